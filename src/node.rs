//! C7: the optional typed-document overlay — a monotonic catalog-ID
//! allocator, node records with a name, a field map, and a parent-ID set
//! (spec §4.8).

use std::collections::HashMap;

use crate::codec::{decode_scalar, encode_scalar};
use crate::error::{LogbaseError, Result};
use crate::key::Value;
use crate::logbase::Logbase;
use crate::types::{to_lbuint, LbType};

/// The two namespaces a node's name may live in. Only a `Kind` node may
/// appear in another node's parent set (spec §3: "only kind-typed nodes
/// may be parents").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A node that other nodes may declare as a parent.
    Kind,
    /// A node that carries document fields but may not be a parent.
    Doc,
}

impl NodeKind {
    fn prefix(self) -> &'static str {
        match self {
            NodeKind::Kind => "kind",
            NodeKind::Doc => "doc",
        }
    }

    fn from_full_name(full_name: &str) -> Option<Self> {
        if full_name.starts_with("kind:") {
            Some(NodeKind::Kind)
        } else if full_name.starts_with("doc:") {
            Some(NodeKind::Doc)
        } else {
            None
        }
    }
}

/// Where a node is in its lifecycle (spec §4.8). Tracked only for callers
/// that want to assert on it in tests; `save` works regardless of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Allocated but never saved.
    Fresh,
    /// Read back from the catalog, unmodified since.
    Loaded,
    /// Changed since it was created or loaded, not yet saved.
    Modified,
    /// Written to the catalog by `save`.
    Saved,
}

/// A catalog entry in the node overlay: a namespaced name, a field map,
/// and a set of kind-typed parent IDs.
#[derive(Debug, Clone)]
pub struct Node {
    id: u64,
    namespace: NodeKind,
    name: String,
    fields: HashMap<String, Value>,
    parents: Vec<u64>,
    state: NodeState,
}

impl Node {
    /// Allocate a fresh node with a new catalog ID.
    pub fn fresh(logbase: &Logbase, namespace: NodeKind, name: impl Into<String>) -> Self {
        Node {
            id: logbase.pop_next_id(),
            namespace,
            name: name.into(),
            fields: HashMap::new(),
            parents: Vec::new(),
            state: NodeState::Fresh,
        }
    }

    /// This node's catalog ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this node is a `Kind` or a `Doc`.
    pub fn namespace(&self) -> NodeKind {
        self.namespace
    }

    /// The node's name, without its namespace prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where this node is in its save lifecycle.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The name under which this node is indexed in the master catalog,
    /// e.g. `"kind:Colour"`.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.name)
    }

    /// Look up a field by label.
    pub fn field(&self, label: &str) -> Option<&Value> {
        self.fields.get(label)
    }

    /// This node's parent IDs, in the order they were added.
    pub fn parents(&self) -> &[u64] {
        &self.parents
    }

    /// Add or overwrite a field.
    pub fn set_field(&mut self, label: impl Into<String>, value: Value) {
        self.fields.insert(label.into(), value);
        if self.state != NodeState::Fresh {
            self.state = NodeState::Modified;
        }
    }

    /// Add `parent` to this node's parent set. Rejected with `BadType`
    /// unless `parent` is a `Kind` node (spec §4.8).
    pub fn add_parent(&mut self, parent: &Node) -> Result<()> {
        if parent.namespace != NodeKind::Kind {
            return Err(LogbaseError::BadType(format!(
                "{} is not kind-typed and cannot be a parent",
                parent.full_name()
            )));
        }
        if !self.parents.contains(&parent.id) {
            self.parents.push(parent.id);
        }
        if self.state != NodeState::Fresh {
            self.state = NodeState::Modified;
        }
        Ok(())
    }

    /// Write the two catalog entries invariant N1 requires: ID to packed
    /// bytes, and name to the ID as an 8-byte scalar.
    pub fn save(&mut self, logbase: &Logbase) -> Result<()> {
        let packed = encode_node(self)?;
        logbase.put(Value::CatId(self.id), Value::Bytes(packed))?;
        logbase.put(Value::String(self.full_name()), Value::CatId(self.id))?;
        self.state = NodeState::Saved;
        Ok(())
    }

    /// Load a node by its full namespaced name (e.g. `"kind:Colour"`).
    pub fn load(logbase: &Logbase, full_name: &str) -> Result<Self> {
        let (id_bytes, id_tag) = logbase.get(&Value::String(full_name.to_owned()))?;
        let id = match decode_scalar(&id_bytes, id_tag)? {
            Value::CatId(id) => id,
            other => {
                return Err(LogbaseError::BadType(format!(
                    "name record for {full_name} did not decode to a CATID: {other:?}"
                )))
            }
        };
        Self::load_by_id(logbase, id)
    }

    /// Load a node directly by catalog ID.
    pub fn load_by_id(logbase: &Logbase, id: u64) -> Result<Self> {
        let (packed, tag) = logbase.get(&Value::CatId(id))?;
        if tag != LbType::Bytes {
            return Err(LogbaseError::BadType(format!(
                "node record for id {id} is not BYTES: {tag:?}"
            )));
        }
        let mut node = decode_node(&packed)?;
        node.state = NodeState::Loaded;
        Ok(node)
    }

    /// For every `STRING` key in `logbase` whose namespace matches
    /// `node_type`, load the node and keep it iff its parent set contains
    /// `kind_name`'s ID (spec §4.8, `find_of_kind`).
    pub fn find_of_kind(logbase: &Logbase, kind_name: &str, node_type: NodeKind) -> Result<Vec<Node>> {
        let kind = Node::load(logbase, &format!("kind:{kind_name}"))?;
        let mut out = Vec::new();
        for full_name in logbase.string_keys() {
            if NodeKind::from_full_name(&full_name) != Some(node_type) {
                continue;
            }
            let node = Node::load(logbase, &full_name)?;
            if node.parents.contains(&kind.id) {
                out.push(node);
            }
        }
        Ok(out)
    }
}

/// Pack a node per spec §4.8: `CATID` tag + 8-byte ID + `CATKEY` tag +
/// name-size + name-bytes + (`MAP` tag + size + bytes) | `NIL` tag +
/// (`CATID_SET` tag + size + bytes) | `NIL` tag.
fn encode_node(node: &Node) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.push(LbType::CatId.as_u8());
    buf.extend_from_slice(&node.id.to_be_bytes());

    let name_bytes = node.full_name().into_bytes();
    buf.push(LbType::CatKey.as_u8());
    buf.extend_from_slice(&to_lbuint(name_bytes.len() as u64)?.to_be_bytes());
    buf.extend_from_slice(&name_bytes);

    if node.fields.is_empty() {
        buf.push(LbType::Nil.as_u8());
    } else {
        let field_bytes = encode_field_map(&node.fields)?;
        buf.push(LbType::Map.as_u8());
        buf.extend_from_slice(&to_lbuint(field_bytes.len() as u64)?.to_be_bytes());
        buf.extend_from_slice(&field_bytes);
    }

    if node.parents.is_empty() {
        buf.push(LbType::Nil.as_u8());
    } else {
        buf.push(LbType::CatIdSet.as_u8());
        let set_bytes: Vec<u8> = node.parents.iter().flat_map(|id| id.to_be_bytes()).collect();
        buf.extend_from_slice(&to_lbuint(set_bytes.len() as u64)?.to_be_bytes());
        buf.extend_from_slice(&set_bytes);
    }

    Ok(buf)
}

fn encode_field_map(fields: &HashMap<String, Value>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for (label, value) in fields {
        let label_bytes = label.as_bytes();
        buf.extend_from_slice(&to_lbuint(label_bytes.len() as u64)?.to_be_bytes());
        buf.extend_from_slice(label_bytes);

        let value_bytes = encode_scalar(value, value.lbtype())?;
        let value_size = to_lbuint(1 + value_bytes.len() as u64)?;
        buf.extend_from_slice(&value_size.to_be_bytes());
        buf.push(value.lbtype().as_u8());
        buf.extend_from_slice(&value_bytes);
    }
    Ok(buf)
}

fn decode_node(bytes: &[u8]) -> Result<Node> {
    let mut cursor = Cursor::new(bytes);

    let id_tag = cursor.take_u8()?;
    if id_tag != LbType::CatId.as_u8() {
        return Err(LogbaseError::BadType(format!("expected CATID tag, got {id_tag}")));
    }
    let id = cursor.take_u64()?;

    let name_tag = cursor.take_u8()?;
    if name_tag != LbType::CatKey.as_u8() {
        return Err(LogbaseError::BadType(format!("expected CATKEY tag, got {name_tag}")));
    }
    let name_size = cursor.take_u32()?;
    let name_bytes = cursor.take(name_size as usize)?;
    let full_name = String::from_utf8_lossy(name_bytes).into_owned();
    let (namespace, name) = split_full_name(&full_name)?;

    let fields = match LbType::from_u8(cursor.take_u8()?)? {
        LbType::Map => {
            let size = cursor.take_u32()?;
            decode_field_map(cursor.take(size as usize)?)?
        }
        LbType::Nil => HashMap::new(),
        other => return Err(LogbaseError::BadType(format!("expected MAP or NIL tag, got {other:?}"))),
    };

    let parents = match LbType::from_u8(cursor.take_u8()?)? {
        LbType::CatIdSet => {
            let size = cursor.take_u32()?;
            let blob = cursor.take(size as usize)?;
            if blob.len() % 8 != 0 {
                return Err(LogbaseError::UnexpectedSize {
                    offset: 0,
                    context: format!("CATID_SET byte length {} is not a multiple of 8", blob.len()),
                });
            }
            blob.chunks_exact(8).map(|c| u64::from_be_bytes(c.try_into().unwrap())).collect()
        }
        LbType::Nil => Vec::new(),
        other => return Err(LogbaseError::BadType(format!("expected CATID_SET or NIL tag, got {other:?}"))),
    };

    Ok(Node {
        id,
        namespace,
        name,
        fields,
        parents,
        state: NodeState::Loaded,
    })
}

fn split_full_name(full_name: &str) -> Result<(NodeKind, String)> {
    match NodeKind::from_full_name(full_name) {
        Some(namespace) => {
            let rest = full_name.splitn(2, ':').nth(1).unwrap_or_default().to_owned();
            Ok((namespace, rest))
        }
        None => Err(LogbaseError::BadType(format!(
            "node name {full_name} has neither a \"kind:\" nor \"doc:\" prefix"
        ))),
    }
}

fn decode_field_map(bytes: &[u8]) -> Result<HashMap<String, Value>> {
    let mut cursor = Cursor::new(bytes);
    let mut fields = HashMap::new();
    while cursor.remaining() > 0 {
        let label_size = cursor.take_u32()?;
        let label = String::from_utf8_lossy(cursor.take(label_size as usize)?).into_owned();
        let value_size = cursor.take_u32()?;
        if value_size == 0 {
            return Err(LogbaseError::UnexpectedSize {
                offset: 0,
                context: "field value-size must include the type-tag byte".into(),
            });
        }
        let type_tag = cursor.take_u8()?;
        let value_bytes = cursor.take(value_size as usize - 1)?;
        let value = decode_scalar(value_bytes, LbType::from_u8(type_tag)?)?;
        fields.insert(label, value);
    }
    Ok(fields)
}

/// A minimal forward-only byte cursor for parsing the node's packed
/// layout, which mixes fixed-width fields with length-prefixed blobs in a
/// way `FileHandle::process` (built for the four *file* record kinds)
/// does not model.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(LogbaseError::UnexpectedSize {
                offset: self.pos as u64,
                context: format!("wanted {n} bytes, {} remaining", self.remaining()),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn e5_find_of_kind_returns_children() {
        let dir = tempdir().unwrap();
        let logbase = Logbase::open(dir.path()).unwrap();

        let mut colour = Node::fresh(&logbase, NodeKind::Kind, "Colour");
        colour.save(&logbase).unwrap();

        let mut green = Node::fresh(&logbase, NodeKind::Kind, "Green");
        green.add_parent(&colour).unwrap();
        green.save(&logbase).unwrap();

        let mut blue = Node::fresh(&logbase, NodeKind::Kind, "Blue");
        blue.add_parent(&colour).unwrap();
        blue.save(&logbase).unwrap();

        let children = Node::find_of_kind(&logbase, "Colour", NodeKind::Kind).unwrap();
        let mut names: Vec<&str> = children.iter().map(|n| n.name()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Blue", "Green"]);
    }

    #[test]
    fn e6_doc_fields_round_trip_through_save_and_reload() {
        let dir = tempdir().unwrap();
        {
            let logbase = Logbase::open(dir.path()).unwrap();
            let mut animal = Node::fresh(&logbase, NodeKind::Kind, "Animal");
            animal.save(&logbase).unwrap();

            let mut green = Node::fresh(&logbase, NodeKind::Kind, "Green");
            green.save(&logbase).unwrap();

            let mut frog = Node::fresh(&logbase, NodeKind::Doc, "frog");
            frog.add_parent(&animal).unwrap();
            frog.set_field("name", Value::String("Oscar".into()));
            frog.set_field("colour", Value::CatId(green.id()));
            frog.save(&logbase).unwrap();
            logbase.save().unwrap();
        }

        let logbase = Logbase::open(dir.path()).unwrap();
        let frog = Node::load(&logbase, "doc:frog").unwrap();
        assert_eq!(frog.field("name"), Some(&Value::String("Oscar".into())));
        assert!(matches!(frog.field("colour"), Some(Value::CatId(_))));
    }

    #[test]
    fn doc_typed_parent_is_rejected() {
        let dir = tempdir().unwrap();
        let logbase = Logbase::open(dir.path()).unwrap();
        let mut frog = Node::fresh(&logbase, NodeKind::Doc, "frog");
        let mut other_doc = Node::fresh(&logbase, NodeKind::Doc, "other");
        other_doc.save(&logbase).unwrap();
        let err = frog.add_parent(&other_doc).unwrap_err();
        assert!(matches!(err, LogbaseError::BadType(_)));
    }
}
