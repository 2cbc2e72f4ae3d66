//! Snapshot: the complete result of one aggregation.

use crate::error::{AggregateError, Result};
use crate::types::Document;
use serde_json::Value;

/// Ordered result documents plus the optional extras record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    documents: Vec<Value>,
    extras: Option<Document>,
}

impl Snapshot {
    /// Snapshot whose documents are the records themselves.
    pub fn new(documents: Vec<Value>) -> Self {
        Self {
            documents,
            extras: None,
        }
    }

    /// Build a snapshot from raw aggregation output.
    ///
    /// With `docs_prop_name`, the output must be exactly one object whose
    /// named field is an array; that array becomes the documents and the
    /// remaining top-level fields become the extras record.
    pub fn from_records(mut records: Vec<Value>, docs_prop_name: Option<&str>) -> Result<Self> {
        let Some(field) = docs_prop_name else {
            return Ok(Self::new(records));
        };

        if records.len() != 1 {
            return Err(AggregateError::UnexpectedShape(format!(
                "expected exactly one record holding `{}`, got {}",
                field,
                records.len()
            )));
        }

        let mut fields = match records.pop() {
            Some(Value::Object(fields)) => fields,
            other => {
                return Err(AggregateError::UnexpectedShape(format!(
                    "expected an object holding `{}`, got {}",
                    field,
                    other.unwrap_or(Value::Null)
                )))
            }
        };

        let documents = match fields.remove(field) {
            Some(Value::Array(documents)) => documents,
            Some(other) => {
                return Err(AggregateError::UnexpectedShape(format!(
                    "`{}` must be an array, got {}",
                    field, other
                )))
            }
            None => {
                return Err(AggregateError::UnexpectedShape(format!(
                    "result has no `{}` field",
                    field
                )))
            }
        };

        Ok(Self {
            documents,
            extras: Some(fields),
        })
    }

    pub fn documents(&self) -> &[Value] {
        &self.documents
    }

    pub fn extras(&self) -> Option<&Document> {
        self.extras.as_ref()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Value>, Option<Document>) {
        (self.documents, self.extras)
    }
}
