use std::io::Read;

use indexmap::IndexSet;

use crate::error::KbError;

/// Column name to the distinct values observed under it, both in first-seen
/// order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldMap {
    columns: Vec<(String, IndexSet<String>)>,
}

impl FieldMap {
    fn with_columns(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            columns: names.into_iter().map(|name| (name, IndexSet::new())).collect(),
        }
    }

    fn observe(&mut self, column: usize, value: &str) {
        if let Some((_, values)) = self.columns.get_mut(column) {
            if !values.contains(value) {
                values.insert(value.to_string());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexSet<String>)> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values))
    }

    pub fn values(&self, column: &str) -> Option<&IndexSet<String>> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, values)| values)
    }
}

/// Read a headered UTF-8 CSV into a [`FieldMap`]. A leading byte-order mark
/// is ignored.
pub fn read_fields<R: Read>(reader: R) -> Result<FieldMap, KbError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader.headers()?.iter().enumerate().map(|(i, h)| {
        if i == 0 {
            h.trim_start_matches('\u{feff}').to_string()
        } else {
            h.to_string()
        }
    });
    let mut fields = FieldMap::with_columns(headers.collect::<Vec<_>>());
    let mut record = csv::StringRecord::new();
    while csv_reader.read_record(&mut record)? {
        for (column, value) in record.iter().enumerate() {
            fields.observe(column, value);
        }
    }
    Ok(fields)
}
