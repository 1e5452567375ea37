//! Band tree: the hierarchical data a report is rendered from
//!
//! Bands live in an arena ([`BandTree`]) and refer to each other through
//! [`BandId`]s, so the parent back-reference is a plain index. The tree is
//! built before rendering and read-only afterwards.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Name of the synthetic root band
pub const ROOT_BAND_NAME: &str = "Root";

/// Index of a band inside its [`BandTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BandId(usize);

impl BandId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// How repeated occurrences of a band are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Each occurrence is a new run of rows
    #[default]
    Horizontal,
    /// Each occurrence is a new run of columns
    Vertical,
}

/// A band parameter value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParamValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Binary content, consumed by content inliners (images, bitmaps)
    Bytes(Vec<u8>),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(value: NaiveDate) -> Self {
        ParamValue::Date(value)
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(value: NaiveDateTime) -> Self {
        ParamValue::DateTime(value)
    }
}

/// A named node of report data
#[derive(Debug, Clone)]
pub struct BandData {
    name: String,
    orientation: Orientation,
    data: BTreeMap<String, ParamValue>,
    parent: Option<BandId>,
    /// Child groups in insertion order: name -> occurrences
    children: Vec<(String, Vec<BandId>)>,
}

impl BandData {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn data(&self) -> &BTreeMap<String, ParamValue> {
        &self.data
    }

    pub fn parent(&self) -> Option<BandId> {
        self.parent
    }
}

/// Arena holding a whole band hierarchy under a synthetic root
#[derive(Debug, Clone)]
pub struct BandTree {
    bands: Vec<BandData>,
}

impl Default for BandTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BandTree {
    /// Create a tree holding only the root band
    pub fn new() -> Self {
        Self {
            bands: vec![BandData {
                name: ROOT_BAND_NAME.to_string(),
                orientation: Orientation::Horizontal,
                data: BTreeMap::new(),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> BandId {
        BandId(0)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.len() <= 1
    }

    /// Append a child occurrence to `parent` and return its id
    pub fn add_band(
        &mut self,
        parent: BandId,
        name: impl Into<String>,
        orientation: Orientation,
    ) -> BandId {
        let name = name.into();
        let id = BandId(self.bands.len());
        self.bands.push(BandData {
            name: name.clone(),
            orientation,
            data: BTreeMap::new(),
            parent: Some(parent),
            children: Vec::new(),
        });

        let groups = &mut self.bands[parent.0].children;
        match groups.iter_mut().find(|(group, _)| *group == name) {
            Some((_, ids)) => ids.push(id),
            None => groups.push((name, vec![id])),
        }
        id
    }

    /// Set a parameter on a band
    pub fn set_param(&mut self, band: BandId, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.bands[band.0].data.insert(key.into(), value.into());
    }

    pub fn band(&self, id: BandId) -> &BandData {
        &self.bands[id.0]
    }

    pub fn name(&self, id: BandId) -> &str {
        &self.bands[id.0].name
    }

    pub fn orientation(&self, id: BandId) -> Orientation {
        self.bands[id.0].orientation
    }

    pub fn parent(&self, id: BandId) -> Option<BandId> {
        self.bands[id.0].parent
    }

    pub fn param(&self, id: BandId, key: &str) -> Option<&ParamValue> {
        self.bands[id.0].data.get(key)
    }

    /// True for bands directly under the root
    pub fn is_first_level(&self, id: BandId) -> bool {
        self.parent(id) == Some(self.root())
    }

    /// All children in original order: group by group, occurrence by occurrence
    pub fn children(&self, id: BandId) -> impl Iterator<Item = BandId> + '_ {
        self.bands[id.0]
            .children
            .iter()
            .flat_map(|(_, ids)| ids.iter().copied())
    }

    /// Occurrences of the child group `name`
    pub fn children_by_name(&self, id: BandId, name: &str) -> &[BandId] {
        self.bands[id.0]
            .children
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, ids)| ids.as_slice())
            .unwrap_or(&[])
    }

    /// Chain of ancestors, nearest first, root last
    pub fn ancestors(&self, id: BandId) -> impl Iterator<Item = BandId> + '_ {
        std::iter::successors(self.parent(id), move |band| self.parent(*band))
    }

    /// Breadth-first search for the first band named `name` below `from`
    pub fn find_band_recursively(&self, from: BandId, name: &str) -> Option<BandId> {
        let mut queue: VecDeque<BandId> = self.children(from).collect();
        while let Some(band) = queue.pop_front() {
            if self.name(band) == name {
                return Some(band);
            }
            queue.extend(self.children(band));
        }
        None
    }

    /// Resolve a dotted path (`Orders.Items`) from the root
    pub fn find_band_by_path(&self, path: &str) -> Option<BandId> {
        if path == ROOT_BAND_NAME {
            return Some(self.root());
        }
        let mut current = self.root();
        for part in path.split('.') {
            current = self.find_band_recursively(current, part)?;
        }
        Some(current)
    }

    /// Depth-first pre-order walk of `id` and its subtree
    pub fn visit<F: FnMut(BandId)>(&self, id: BandId, visitor: &mut F) {
        visitor(id);
        for child in self.children(id) {
            self.visit(child, visitor);
        }
    }

    /// Build a tree from its serde description; the root description's name is ignored
    pub fn from_spec(root: &BandSpec) -> Self {
        let mut tree = Self::new();
        let root_id = tree.root();
        tree.fill_from_spec(root_id, root);
        tree
    }

    fn fill_from_spec(&mut self, id: BandId, spec: &BandSpec) {
        for (key, value) in &spec.data {
            self.set_param(id, key.clone(), value.clone());
        }
        for child in &spec.bands {
            let child_id = self.add_band(id, child.name.clone(), child.orientation);
            self.fill_from_spec(child_id, child);
        }
    }
}

/// Serializable description of a band, as read by the CLI from JSON
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BandSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub data: BTreeMap<String, SpecValue>,
    /// Children in rendering order
    #[serde(default)]
    pub bands: Vec<BandSpec>,
}

/// JSON-friendly parameter value
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SpecValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date { date: NaiveDate },
    DateTime { datetime: NaiveDateTime },
}

impl From<SpecValue> for ParamValue {
    fn from(value: SpecValue) -> Self {
        match value {
            SpecValue::Null => ParamValue::Null,
            SpecValue::Bool(b) => ParamValue::Bool(b),
            SpecValue::Integer(i) => ParamValue::Integer(i),
            SpecValue::Float(f) => ParamValue::Float(f),
            SpecValue::Text(s) => ParamValue::Text(s),
            SpecValue::Date { date } => ParamValue::Date(date),
            SpecValue::DateTime { datetime } => ParamValue::DateTime(datetime),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_tree() -> (BandTree, BandId, BandId, BandId) {
        let mut tree = BandTree::new();
        let root = tree.root();
        let order = tree.add_band(root, "Orders", Orientation::Horizontal);
        let item1 = tree.add_band(order, "Items", Orientation::Horizontal);
        let item2 = tree.add_band(order, "Items", Orientation::Horizontal);
        tree.add_band(root, "Totals", Orientation::Horizontal);
        (tree, order, item1, item2)
    }

    #[test]
    fn test_children_keep_order() {
        let (tree, order, item1, item2) = orders_tree();
        let root_children: Vec<_> = tree.children(tree.root()).map(|b| tree.name(b)).collect();
        assert_eq!(root_children, vec!["Orders", "Totals"]);
        assert_eq!(tree.children_by_name(order, "Items"), &[item1, item2]);
        assert!(tree.children_by_name(order, "Missing").is_empty());
    }

    #[test]
    fn test_parent_links() {
        let (tree, order, item1, _) = orders_tree();
        assert_eq!(tree.parent(item1), Some(order));
        assert!(tree.is_first_level(order));
        assert!(!tree.is_first_level(item1));
        let ancestors: Vec<_> = tree.ancestors(item1).collect();
        assert_eq!(ancestors, vec![order, tree.root()]);
    }

    #[test]
    fn test_find_band_by_path() {
        let (tree, order, item1, _) = orders_tree();
        assert_eq!(tree.find_band_by_path("Root"), Some(tree.root()));
        assert_eq!(tree.find_band_by_path("Orders"), Some(order));
        assert_eq!(tree.find_band_by_path("Orders.Items"), Some(item1));
        assert_eq!(tree.find_band_by_path("Items"), Some(item1));
        assert_eq!(tree.find_band_by_path("Nope"), None);
    }

    #[test]
    fn test_visit_is_depth_first() {
        let (tree, _, _, _) = orders_tree();
        let mut names = Vec::new();
        tree.visit(tree.root(), &mut |band| names.push(tree.name(band).to_string()));
        assert_eq!(names, vec!["Root", "Orders", "Items", "Items", "Totals"]);
    }

    #[test]
    fn test_from_spec_json() {
        let json = r#"{
            "data": {"title": "Q1"},
            "bands": [
                {"name": "Items", "data": {"name": "Apple", "qty": 3, "price": 1.5}},
                {"name": "Items", "data": {"name": "Pear", "qty": 2, "shipped": {"date": "2024-03-01"}}},
                {"name": "Months", "orientation": "vertical", "data": {"m": null}}
            ]
        }"#;
        let spec: BandSpec = serde_json::from_str(json).unwrap();
        let tree = BandTree::from_spec(&spec);
        let root = tree.root();

        assert_eq!(tree.param(root, "title"), Some(&ParamValue::Text("Q1".into())));
        let items = tree.children_by_name(root, "Items");
        assert_eq!(items.len(), 2);
        assert_eq!(tree.param(items[0], "qty"), Some(&ParamValue::Integer(3)));
        assert_eq!(tree.param(items[0], "price"), Some(&ParamValue::Float(1.5)));
        assert_eq!(
            tree.param(items[1], "shipped"),
            Some(&ParamValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
        );
        let months = tree.children_by_name(root, "Months");
        assert_eq!(tree.orientation(months[0]), Orientation::Vertical);
        assert_eq!(tree.param(months[0], "m"), Some(&ParamValue::Null));
    }
}
