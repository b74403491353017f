//! Typed columnar tables loaded from CSV.
//!
//! The expected input format is a CSV file whose header tags every column
//! with its scalar type, e.g. `City(String),Population(Integer)`. String
//! values are interned so that row comparisons reduce to key equality;
//! every numeric type is widened to `f64` so that one comparison path
//! covers integers and doubles alike.

use csv_core::{ReadFieldResult, ReaderBuilder};
use lasso::{Rodeo, RodeoResolver, Spur};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str;
use tracing::debug;

use crate::{DiscoveryError, Operator, MAX_SAMPLE_ROWS};

/// The scalar type declared for a column in the table header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnType {
    /// Interned text; supports equality comparisons only.
    Text,
    /// `f64` storage; integers are widened on load.
    Numeric,
}

enum Values {
    Text(Vec<Spur>),
    Number(Vec<f64>),
}

/// A single named, typed column. Immutable once the table is loaded.
pub struct Column {
    name: String,
    values: Values,
}

impl Column {
    /// The column name, without its header type tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared scalar type.
    pub fn column_type(&self) -> ColumnType {
        match self.values {
            Values::Text(_) => ColumnType::Text,
            Values::Number(_) => ColumnType::Numeric,
        }
    }

    /// Evaluates `row i θ row j` over this column's values.
    ///
    /// The predicate catalog never pairs order operators with text columns,
    /// so the text arm only has to handle equality and inequality.
    pub(crate) fn satisfies(&self, operator: Operator, i: usize, j: usize) -> bool {
        match &self.values {
            Values::Text(v) => match operator {
                Operator::Eq => v[i] == v[j],
                Operator::Ne => v[i] != v[j],
                _ => {
                    debug_assert!(false, "order operator on a text column");
                    false
                }
            },
            Values::Number(v) => operator.compare(v[i], v[j]),
        }
    }
}

/// A row-sampled table with per-column typed storage.
pub struct Table {
    columns: Vec<Column>,
    rows: usize,
    strings: RodeoResolver<Spur>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.columns.iter().map(Column::name).collect();
        f.debug_struct("Table")
            .field("rows", &self.rows)
            .field("columns", &names)
            .finish()
    }
}

impl Table {
    /// Loads up to `row_limit` rows from a CSV file at `path`.
    pub fn from_csv_path<P: AsRef<Path>>(path: P, row_limit: usize) -> Result<Table, DiscoveryError> {
        Table::from_csv_reader(BufReader::new(File::open(path)?), row_limit)
    }

    /// Loads up to `row_limit` rows from any CSV byte stream.
    ///
    /// The first record must be a header of `name(Type)` fields. Unknown
    /// type tags, values that fail to parse under their declared type, and
    /// ragged records all surface as errors rather than silent defaults.
    pub fn from_csv_reader<R: Read>(mut input: R, row_limit: usize) -> Result<Table, DiscoveryError> {
        if row_limit > MAX_SAMPLE_ROWS {
            return Err(DiscoveryError::DepthOrSampleTooLarge(format!(
                "row limit {} exceeds the {} row sample budget",
                row_limit, MAX_SAMPLE_ROWS
            )));
        }

        let mut inputbuf = [0; 16384];
        let mut fieldbuf = [0; 4096];
        let mut fieldlen = 0;
        let mut record = Vec::new();
        let mut schema: Option<Vec<(String, ColumnType)>> = None;
        let mut builders: Vec<Values> = Vec::new();
        let mut strings = Rodeo::new();
        let mut rows = 0;
        let mut csv = ReaderBuilder::new().build();

        'read: loop {
            let read = input.read(&mut inputbuf)?;
            let mut bytes = &inputbuf[..read];
            loop {
                let (result, nin, nout) = csv.read_field(bytes, &mut fieldbuf[fieldlen..]);
                bytes = &bytes[nin..];
                fieldlen += nout;
                match result {
                    ReadFieldResult::InputEmpty => break,
                    ReadFieldResult::OutputFull => {
                        return Err(DiscoveryError::UnsupportedFormat(format!(
                            "field too long on line {}",
                            csv.line()
                        )));
                    }
                    ReadFieldResult::Field { record_end } => {
                        let field = str::from_utf8(&fieldbuf[..fieldlen]).map_err(|_| {
                            DiscoveryError::UnsupportedFormat(format!(
                                "invalid UTF-8 on line {}",
                                csv.line()
                            ))
                        })?;
                        record.push(field.to_string());
                        fieldlen = 0;

                        if record_end {
                            if let Some(schema) = &schema {
                                if record.len() != schema.len() {
                                    return Err(DiscoveryError::UnsupportedFormat(format!(
                                        "line {}: expected {} fields, found {}",
                                        csv.line(),
                                        schema.len(),
                                        record.len()
                                    )));
                                }
                                for ((field, (name, _)), builder) in
                                    record.iter().zip(schema).zip(builders.iter_mut())
                                {
                                    append_value(field, name, builder, &mut strings)?;
                                }
                                rows += 1;
                                if rows == row_limit {
                                    break 'read;
                                }
                            } else {
                                let parsed = record
                                    .iter()
                                    .map(|field| parse_header_field(field))
                                    .collect::<Result<Vec<_>, _>>()?;
                                builders = parsed
                                    .iter()
                                    .map(|(_, ty)| match ty {
                                        ColumnType::Text => Values::Text(Vec::new()),
                                        ColumnType::Numeric => Values::Number(Vec::new()),
                                    })
                                    .collect();
                                schema = Some(parsed);
                            }
                            record.clear();
                        }
                    }
                    ReadFieldResult::End => break 'read,
                }
            }
        }

        let schema = schema.ok_or_else(|| {
            DiscoveryError::UnsupportedFormat("input contains no header record".to_string())
        })?;
        let columns = schema
            .into_iter()
            .zip(builders)
            .map(|((name, _), values)| Column { name, values })
            .collect::<Vec<_>>();
        debug!(rows, columns = columns.len(), "table loaded");

        Ok(Table {
            columns,
            rows,
            strings: strings.into_resolver(),
        })
    }

    /// The number of sampled rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// All columns, in header order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// A single column by index.
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// The text value at `(column, row)`, or `None` for numeric columns.
    pub fn text(&self, column: usize, row: usize) -> Option<&str> {
        match &self.columns[column].values {
            Values::Text(v) => Some(self.strings.resolve(&v[row])),
            Values::Number(_) => None,
        }
    }

    /// The numeric value at `(column, row)`, or `None` for text columns.
    pub fn number(&self, column: usize, row: usize) -> Option<f64> {
        match &self.columns[column].values {
            Values::Text(_) => None,
            Values::Number(v) => Some(v[row]),
        }
    }

    /// The position list index of a column: row indices grouped by value,
    /// groups ordered by ascending value.
    ///
    /// The group sizes double as the value-frequency vector consumed by
    /// [`Operator::expected_rate`], whose cumulative closed forms assume
    /// exactly this ordering.
    pub fn position_list_index(&self, column: usize) -> Vec<Vec<u32>> {
        match &self.columns[column].values {
            Values::Text(v) => {
                let mut groups: HashMap<Spur, Vec<u32>> = HashMap::new();
                for (row, key) in v.iter().enumerate() {
                    groups.entry(*key).or_default().push(row as u32);
                }
                let mut groups = groups
                    .into_iter()
                    .map(|(key, rows)| (self.strings.resolve(&key), rows))
                    .collect::<Vec<_>>();
                groups.sort_unstable_by(|a, b| a.0.cmp(b.0));
                groups.into_iter().map(|(_, rows)| rows).collect()
            }
            Values::Number(v) => {
                let mut order = (0..v.len() as u32).collect::<Vec<_>>();
                // Stable sort keeps rows with equal values in row order.
                order.sort_by(|a, b| v[*a as usize].total_cmp(&v[*b as usize]));
                let mut groups: Vec<Vec<u32>> = Vec::new();
                for row in order {
                    match groups.last_mut() {
                        Some(group) if v[group[0] as usize] == v[row as usize] => group.push(row),
                        _ => groups.push(vec![row]),
                    }
                }
                groups
            }
        }
    }

    /// Per-distinct-value counts for a column, ordered by ascending value.
    pub fn value_frequencies(&self, column: usize) -> Vec<f64> {
        self.position_list_index(column)
            .iter()
            .map(|group| group.len() as f64)
            .collect()
    }
}

fn parse_header_field(field: &str) -> Result<(String, ColumnType), DiscoveryError> {
    // Accept both `Name(Type)` and the space-separated `Name Type` form.
    let (name, tag) = field
        .rsplit_once('(')
        .or_else(|| field.rsplit_once(' '))
        .ok_or_else(|| {
            DiscoveryError::UnsupportedFormat(format!("header field {:?} has no type tag", field))
        })?;
    let ty = match tag.trim_end_matches(')') {
        "String" | "str" => ColumnType::Text,
        "Integer" | "Int" | "int" | "Double" | "Float" | "float" => ColumnType::Numeric,
        other => {
            return Err(DiscoveryError::TypeTagMismatch {
                column: name.trim().to_string(),
                value: other.to_string(),
                declared: "a supported type tag (String, Integer, Double)",
            });
        }
    };
    Ok((name.trim().to_string(), ty))
}

fn append_value(
    field: &str,
    column: &str,
    builder: &mut Values,
    strings: &mut Rodeo,
) -> Result<(), DiscoveryError> {
    match builder {
        Values::Text(v) => v.push(strings.get_or_intern(field)),
        Values::Number(v) => {
            let parsed: f64 = field.trim().parse().map_err(|_| DiscoveryError::TypeTagMismatch {
                column: column.to_string(),
                value: field.to_string(),
                declared: "a numeric value",
            })?;
            if parsed.is_nan() {
                return Err(DiscoveryError::TypeTagMismatch {
                    column: column.to_string(),
                    value: field.to_string(),
                    declared: "a non-NaN numeric value",
                });
            }
            v.push(parsed);
        }
    }
    Ok(())
}
