//! Desired-structure document.
//!
//! The document lists tables with their columns, sequences and key rows in
//! declaration order. Names may carry the placeholder prefix; they are
//! resolved by the runner, not here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::structure::{ColumnSpec, KeyDescriptor, SequenceSpec, TableStructure};

/// A parsed definition document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructureDefinition {
    /// Tables in the order they should be synchronized.
    pub tables: Vec<TableDefinition>,
}

/// One table of a definition document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table name, usually starting with the placeholder prefix.
    pub name: String,
    /// Columns in declaration order.
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    /// Sequences owned by columns of this table.
    #[serde(default)]
    pub sequences: Vec<SequenceSpec>,
    /// Key rows, one per indexed column.
    #[serde(default)]
    pub keys: Vec<KeyDescriptor>,
}

impl StructureDefinition {
    /// Converts the document into validated table structures.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StructureInvalid`] for a table, column or
    /// sequence defined twice, or a table that fails validation.
    pub fn into_tables(self) -> Result<Vec<TableStructure>> {
        let mut seen = HashSet::new();
        let mut tables = Vec::with_capacity(self.tables.len());

        for table in self.tables {
            if !seen.insert(table.name.clone()) {
                return Err(SyncError::invalid(&table.name, "table is defined twice"));
            }
            let structure = table.into_structure()?;
            structure.validate()?;
            tables.push(structure);
        }

        Ok(tables)
    }
}

impl TableDefinition {
    fn into_structure(self) -> Result<TableStructure> {
        let mut structure = TableStructure::new(self.name);

        for column in self.columns {
            if structure.columns.contains_key(&column.name) {
                return Err(SyncError::invalid(
                    &structure.table_name,
                    format!("column '{}' is defined twice", column.name),
                ));
            }
            structure = structure.column(column);
        }

        for sequence in self.sequences {
            if structure.sequences.contains_key(&sequence.name) {
                return Err(SyncError::invalid(
                    &structure.table_name,
                    format!("sequence '{}' is defined twice", sequence.name),
                ));
            }
            structure = structure.sequence(sequence);
        }

        for key in self.keys {
            structure = structure.key(key);
        }

        Ok(structure)
    }
}
