//! Fragment graph resolution: rebuild key/value pairs and tables from the
//! flat, relationship-annotated fragment list a forms-analysis service
//! returns.
//!
//! The service never nests anything. A KEY_VALUE_SET fragment points at its
//! WORD children by id, and at its paired VALUE fragment by id; a TABLE points
//! at its CELLs, which point at their WORDs. Resolution is therefore a series
//! of id lookups through a [`FragmentIndex`], built once per document.
//!
//! Lookups are total: [`FragmentIndex::get`] returns
//! [`ExtractError::DanglingReference`] for an unknown id and every traversal
//! propagates it with `?`. A dangling id means the analysis response is
//! malformed, so the whole resolution fails instead of quietly dropping text.
//!
//! ```text
//! KEY_VALUE_SET(KEY) ──CHILD──▶ WORD "Total"
//!        │
//!        └──VALUE──▶ KEY_VALUE_SET(VALUE) ──CHILD──▶ WORD "42.00"
//!
//! TABLE ──CHILD──▶ CELL(r1,c1) ──CHILD──▶ WORD "A"
//!            └───▶ CELL(r1,c2) ──CHILD──▶ WORD "B"
//! ```

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Text emitted for a selected checkbox / radio button.
pub const SELECTED_MARKER: &str = "X";

/// Header line written before each rendered table.
pub const TABLE_HEADER: &str = "Table:";

// ── Wire types ───────────────────────────────────────────────────────────

/// Fragment type as reported by the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FragmentKind {
    Word,
    #[serde(alias = "SELECTION_ELEMENT")]
    SelectionMark,
    KeyValueSet,
    Table,
    Cell,
    /// PAGE, LINE, MERGED_CELL, … are indexed but never resolved.
    #[serde(other)]
    Other,
}

/// State of a SELECTION_MARK fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionStatus {
    Selected,
    NotSelected,
}

/// Role of a KEY_VALUE_SET fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityRole {
    Key,
    Value,
    #[serde(other)]
    Other,
}

/// Kind of edge between two fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    /// The fragment is composed of these children.
    Child,
    /// A KEY fragment's paired VALUE fragment.
    Value,
    #[serde(other)]
    Other,
}

/// A typed edge to one or more fragment ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Relationship {
    #[serde(rename = "Type")]
    pub kind: RelationshipKind,
    #[serde(default)]
    pub ids: Vec<String>,
}

/// One annotated content unit of an analysis response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Fragment {
    pub id: String,
    #[serde(rename = "BlockType")]
    pub kind: FragmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_status: Option<SelectionStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<EntityRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

impl Fragment {
    /// Ids reachable over relationships of the given kind, in response order.
    pub fn related(&self, kind: RelationshipKind) -> impl Iterator<Item = &str> {
        self.relationships
            .iter()
            .filter(move |r| r.kind == kind)
            .flat_map(|r| r.ids.iter().map(String::as_str))
    }

    fn is_key(&self) -> bool {
        self.kind == FragmentKind::KeyValueSet && self.entity_types.contains(&EntityRole::Key)
    }

    fn is_selected(&self) -> bool {
        self.selection_status == Some(SelectionStatus::Selected)
    }
}

/// Top-level body of an analysis response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResponse {
    #[serde(rename = "Blocks", default)]
    pub blocks: Vec<Fragment>,
}

// ── Index ────────────────────────────────────────────────────────────────

/// Id → fragment lookup table for one document.
pub struct FragmentIndex<'a> {
    fragments: &'a [Fragment],
    by_id: HashMap<&'a str, &'a Fragment>,
}

impl<'a> FragmentIndex<'a> {
    pub fn build(fragments: &'a [Fragment]) -> Self {
        let by_id = fragments.iter().map(|f| (f.id.as_str(), f)).collect();
        Self { fragments, by_id }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Look up `id`, referenced from `from`.
    pub fn get(&self, from: &Fragment, id: &str) -> Result<&'a Fragment, ExtractError> {
        self.by_id
            .get(id)
            .copied()
            .ok_or_else(|| ExtractError::DanglingReference {
                from: from.id.clone(),
                id: id.to_string(),
            })
    }

    /// Flatten a fragment's CHILD words and selected marks into one line.
    ///
    /// WORD children contribute their text, SELECTED marks contribute
    /// [`SELECTED_MARKER`], everything else nothing. Tokens are
    /// space-separated and the result is trimmed.
    pub fn flatten_text(&self, fragment: &Fragment) -> Result<String, ExtractError> {
        let mut text = String::new();
        for id in fragment.related(RelationshipKind::Child) {
            let child = self.get(fragment, id)?;
            match child.kind {
                FragmentKind::Word => {
                    text.push_str(child.text.as_deref().unwrap_or_default());
                    text.push(' ');
                }
                FragmentKind::SelectionMark if child.is_selected() => {
                    text.push_str(SELECTED_MARKER);
                    text.push(' ');
                }
                _ => {}
            }
        }
        Ok(text.trim().to_string())
    }

    /// The VALUE fragment paired with a KEY fragment, if it has one.
    fn value_of(&self, key: &Fragment) -> Result<Option<&'a Fragment>, ExtractError> {
        key.related(RelationshipKind::Value)
            .next()
            .map(|id| self.get(key, id))
            .transpose()
    }

    /// Resolve every KEY fragment that has a VALUE partner.
    ///
    /// Output follows fragment order. A label seen twice keeps its first
    /// position and takes the later value.
    pub fn resolve_fields(&self) -> Result<Vec<ResolvedField>, ExtractError> {
        let mut fields: Vec<ResolvedField> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for key in self.fragments.iter().filter(|f| f.is_key()) {
            let label = self.flatten_text(key)?;
            let Some(value_fragment) = self.value_of(key)? else {
                debug!("Key '{}' has no VALUE relationship, skipping", key.id);
                continue;
            };
            let value = self.flatten_text(value_fragment)?;

            match positions.get(&label) {
                Some(&pos) => fields[pos].value = value,
                None => {
                    positions.insert(label.clone(), fields.len());
                    fields.push(ResolvedField { label, value });
                }
            }
        }

        Ok(fields)
    }

    /// Resolve every TABLE fragment into rows of cell text.
    pub fn resolve_tables(&self) -> Result<Vec<ResolvedTable>, ExtractError> {
        let mut tables = Vec::new();

        for table in self.fragments.iter().filter(|f| f.kind == FragmentKind::Table) {
            let mut grid: BTreeMap<u32, BTreeMap<u32, &Fragment>> = BTreeMap::new();

            for id in table.related(RelationshipKind::Child) {
                let cell = self.get(table, id)?;
                if cell.kind != FragmentKind::Cell {
                    continue;
                }
                match (cell.row_index, cell.column_index) {
                    (Some(row), Some(col)) => {
                        grid.entry(row).or_default().insert(col, cell);
                    }
                    _ => warn!("Cell '{}' has no grid position, skipping", cell.id),
                }
            }

            let rows = grid
                .values()
                .map(|cols| {
                    cols.values()
                        .map(|cell| self.flatten_text(cell))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?;

            tables.push(ResolvedTable { rows });
        }

        Ok(tables)
    }
}

// ── Resolved output ──────────────────────────────────────────────────────

/// A label/value pair recovered from a KEY_VALUE_SET pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedField {
    pub label: String,
    pub value: String,
}

/// Cell text grouped by row, then column, both ascending.
///
/// Rows are not padded: a missing cell is simply absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedTable {
    pub rows: Vec<Vec<String>>,
}

impl ResolvedTable {
    /// Tab-joined cells, newline-joined rows.
    pub fn render(&self) -> String {
        self.rows
            .iter()
            .map(|row| row.join("\t"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Everything recovered from one analysis response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedDocument {
    pub fields: Vec<ResolvedField>,
    pub tables: Vec<ResolvedTable>,
}

impl ResolvedDocument {
    /// One `label: value` line per field.
    pub fn render_fields(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}: {}\n", f.label, f.value))
            .collect()
    }

    /// Each table under a [`TABLE_HEADER`] line, tables separated by a blank line.
    pub fn render_tables(&self) -> String {
        self.tables
            .iter()
            .map(|t| format!("{TABLE_HEADER}\n{}\n", t.render()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Fields, a blank line, then tables: the text substituted into the
    /// forms-path prompt.
    pub fn to_prompt_text(&self) -> String {
        format!("{}\n{}", self.render_fields(), self.render_tables())
    }
}

/// Resolve a full fragment list.
pub fn resolve(fragments: &[Fragment]) -> Result<ResolvedDocument, ExtractError> {
    let index = FragmentIndex::build(fragments);
    debug!("Indexed {} fragments", index.len());

    let fields = index.resolve_fields()?;
    let tables = index.resolve_tables()?;
    debug!(
        "Resolved {} fields and {} tables",
        fields.len(),
        tables.len()
    );

    Ok(ResolvedDocument { fields, tables })
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn word(id: &str, text: &str) -> Fragment {
        Fragment {
            id: id.into(),
            kind: FragmentKind::Word,
            text: Some(text.into()),
            selection_status: None,
            entity_types: vec![],
            row_index: None,
            column_index: None,
            relationships: vec![],
        }
    }

    fn mark(id: &str, status: SelectionStatus) -> Fragment {
        Fragment {
            selection_status: Some(status),
            kind: FragmentKind::SelectionMark,
            text: None,
            ..word(id, "")
        }
    }

    fn rel(kind: RelationshipKind, ids: &[&str]) -> Relationship {
        Relationship {
            kind,
            ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn key(id: &str, children: &[&str], value: Option<&str>) -> Fragment {
        let mut relationships = vec![rel(RelationshipKind::Child, children)];
        if let Some(v) = value {
            relationships.push(rel(RelationshipKind::Value, &[v]));
        }
        Fragment {
            kind: FragmentKind::KeyValueSet,
            text: None,
            entity_types: vec![EntityRole::Key],
            relationships,
            ..word(id, "")
        }
    }

    fn value(id: &str, children: &[&str]) -> Fragment {
        Fragment {
            kind: FragmentKind::KeyValueSet,
            text: None,
            entity_types: vec![EntityRole::Value],
            relationships: vec![rel(RelationshipKind::Child, children)],
            ..word(id, "")
        }
    }

    fn cell(id: &str, row: u32, col: u32, children: &[&str]) -> Fragment {
        Fragment {
            kind: FragmentKind::Cell,
            text: None,
            row_index: Some(row),
            column_index: Some(col),
            relationships: vec![rel(RelationshipKind::Child, children)],
            ..word(id, "")
        }
    }

    fn table(id: &str, cells: &[&str]) -> Fragment {
        Fragment {
            kind: FragmentKind::Table,
            text: None,
            relationships: vec![rel(RelationshipKind::Child, cells)],
            ..word(id, "")
        }
    }

    #[test]
    fn resolves_each_key_with_a_value() {
        let fragments = vec![
            key("k1", &["w1", "w2"], Some("v1")),
            value("v1", &["w3"]),
            key("k2", &["w4"], Some("v2")),
            value("v2", &["w5", "w6"]),
            word("w1", "Invoice"),
            word("w2", "number"),
            word("w3", "F-001"),
            word("w4", "Total"),
            word("w5", "42.00"),
            word("w6", "EUR"),
        ];

        let doc = resolve(&fragments).unwrap();
        assert_eq!(
            doc.fields,
            vec![
                ResolvedField {
                    label: "Invoice number".into(),
                    value: "F-001".into()
                },
                ResolvedField {
                    label: "Total".into(),
                    value: "42.00 EUR".into()
                },
            ]
        );
    }

    #[test]
    fn key_without_value_is_dropped() {
        let fragments = vec![key("k1", &["w1"], None), word("w1", "Orphan")];
        let doc = resolve(&fragments).unwrap();
        assert!(doc.fields.is_empty());
    }

    #[test]
    fn selected_mark_flattens_to_x() {
        let fragments = vec![
            key("k1", &["w1"], Some("v1")),
            value("v1", &["m1", "w2", "m2"]),
            word("w1", "Paid"),
            mark("m1", SelectionStatus::Selected),
            word("w2", "yes"),
            mark("m2", SelectionStatus::NotSelected),
        ];
        let doc = resolve(&fragments).unwrap();
        assert_eq!(doc.fields[0].value, "X yes");
    }

    #[test]
    fn unselected_mark_contributes_nothing() {
        let fragments = vec![
            key("k1", &["w1"], Some("v1")),
            value("v1", &["m1"]),
            word("w1", "Refund"),
            mark("m1", SelectionStatus::NotSelected),
        ];
        let doc = resolve(&fragments).unwrap();
        assert_eq!(doc.fields[0].value, "");
    }

    #[test]
    fn table_rows_are_not_padded() {
        // Cells listed out of order to check numeric sorting.
        let fragments = vec![
            table("t1", &["c3", "c2", "c1"]),
            cell("c1", 1, 1, &["a"]),
            cell("c2", 1, 2, &["b"]),
            cell("c3", 2, 1, &["c"]),
            word("a", "A"),
            word("b", "B"),
            word("c", "C"),
        ];
        let doc = resolve(&fragments).unwrap();
        assert_eq!(doc.tables.len(), 1);
        assert_eq!(doc.tables[0].render(), "A\tB\nC");
    }

    #[test]
    fn row_ten_sorts_after_row_two() {
        let fragments = vec![
            table("t1", &["c10", "c2"]),
            cell("c10", 10, 1, &["x"]),
            cell("c2", 2, 1, &["y"]),
            word("x", "ten"),
            word("y", "two"),
        ];
        let doc = resolve(&fragments).unwrap();
        assert_eq!(doc.tables[0].rows, vec![vec!["two"], vec!["ten"]]);
    }

    #[test]
    fn dangling_child_fails_resolution() {
        let fragments = vec![key("k1", &["missing"], Some("v1")), value("v1", &[])];
        let err = resolve(&fragments).unwrap_err();
        assert!(
            matches!(err, ExtractError::DanglingReference { ref id, .. } if id == "missing"),
            "got: {err:?}"
        );
    }

    #[test]
    fn dangling_value_fails_resolution() {
        let fragments = vec![key("k1", &["w1"], Some("gone")), word("w1", "Name")];
        let err = resolve(&fragments).unwrap_err();
        assert!(matches!(err, ExtractError::DanglingReference { ref from, .. } if from == "k1"));
    }

    #[test]
    fn dangling_cell_fails_resolution() {
        let fragments = vec![table("t1", &["nope"])];
        assert!(resolve(&fragments).is_err());
    }

    #[test]
    fn duplicate_label_keeps_first_position_and_last_value() {
        let fragments = vec![
            key("k1", &["w1"], Some("v1")),
            value("v1", &["w2"]),
            key("k2", &["w3"], Some("v2")),
            value("v2", &["w4"]),
            key("k3", &["w5"], Some("v3")),
            value("v3", &["w6"]),
            word("w1", "Date"),
            word("w2", "01/02"),
            word("w3", "Name"),
            word("w4", "Ada"),
            word("w5", "Date"),
            word("w6", "03/04"),
        ];
        let doc = resolve(&fragments).unwrap();
        assert_eq!(doc.fields.len(), 2);
        assert_eq!(doc.fields[0].label, "Date");
        assert_eq!(doc.fields[0].value, "03/04");
        assert_eq!(doc.fields[1].label, "Name");
    }

    #[test]
    fn prompt_text_layout() {
        let fragments = vec![
            key("k1", &["w1"], Some("v1")),
            value("v1", &["w2"]),
            word("w1", "Total"),
            word("w2", "10"),
            table("t1", &["c1"]),
            cell("c1", 1, 1, &["w3"]),
            word("w3", "Item"),
            table("t2", &["c2"]),
            cell("c2", 1, 1, &["w4"]),
            word("w4", "Tax"),
        ];
        let doc = resolve(&fragments).unwrap();
        assert_eq!(
            doc.to_prompt_text(),
            "Total: 10\n\nTable:\nItem\n\nTable:\nTax\n"
        );
    }

    #[test]
    fn deserialises_analysis_wire_format() {
        let body = r#"{
            "Blocks": [
                {"Id": "p1", "BlockType": "PAGE"},
                {"Id": "k1", "BlockType": "KEY_VALUE_SET", "EntityTypes": ["KEY"],
                 "Relationships": [{"Type": "VALUE", "Ids": ["v1"]}, {"Type": "CHILD", "Ids": ["w1"]}]},
                {"Id": "v1", "BlockType": "KEY_VALUE_SET", "EntityTypes": ["VALUE"],
                 "Relationships": [{"Type": "CHILD", "Ids": ["s1"]}]},
                {"Id": "w1", "BlockType": "WORD", "Text": "Approved", "Confidence": 99.1},
                {"Id": "s1", "BlockType": "SELECTION_ELEMENT", "SelectionStatus": "SELECTED"}
            ]
        }"#;
        let response: AnalysisResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.blocks[0].kind, FragmentKind::Other);
        assert_eq!(response.blocks[4].kind, FragmentKind::SelectionMark);

        let doc = resolve(&response.blocks).unwrap();
        assert_eq!(doc.fields[0].label, "Approved");
        assert_eq!(doc.fields[0].value, "X");
    }
}
