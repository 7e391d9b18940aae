use serde::{Deserialize, Deserializer};
use sqlx::{Encode, Postgres, QueryBuilder, Type};
use uuid::Uuid;

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`). Use with `#[serde(default, deserialize_with = "nullable")]`.
pub fn nullable<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Builds `UPDATE <table> SET a = $1, b = $2, updated_at = now() WHERE id = $n`
/// from only the fields a request actually carried.
pub struct PatchBuilder<'a> {
    query: QueryBuilder<'a, Postgres>,
    fields: usize,
}

impl<'a> PatchBuilder<'a> {
    pub fn new(table: &str) -> Self {
        Self {
            query: QueryBuilder::new(format!("UPDATE {table} SET ")),
            fields: 0,
        }
    }

    pub fn set<T>(&mut self, column: &str, value: T) -> &mut Self
    where
        T: 'a + Encode<'a, Postgres> + Type<Postgres>,
    {
        if self.fields > 0 {
            self.query.push(", ");
        }
        self.query.push(column).push(" = ").push_bind(value);
        self.fields += 1;
        self
    }

    pub fn set_if<T>(&mut self, column: &str, value: Option<T>) -> &mut Self
    where
        T: 'a + Encode<'a, Postgres> + Type<Postgres>,
    {
        if let Some(value) = value {
            self.set(column, value);
        }
        self
    }

    /// Raw SQL assignment, e.g. `username_changed_at = now()`. Not counted
    /// as a field.
    pub fn touch(&mut self, assignment: &str) -> &mut Self {
        if self.fields > 0 {
            self.query.push(", ");
            self.query.push(assignment);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields == 0
    }

    /// Appends the `updated_at` stamp and the row filter. The caller adds
    /// `RETURNING` if it needs the row back.
    pub fn finish(mut self, id: Uuid) -> QueryBuilder<'a, Postgres> {
        self.query.push(", updated_at = now() WHERE id = ").push_bind(id);
        self.query
    }
}
