//! Statements and batches.
//!
//! Binding is checked eagerly: a value that cannot be represented, or that
//! does not fit a type declared with `DECLARE $name AS <Type>;`, fails in
//! `bind` rather than at execution.

use super::connection::Connection;
use super::result::QueryResult;
use super::template::QueryTemplate;
use crate::backend::QueryRequest;
use crate::error::{DriverError, DriverResult};
use crate::types::{NativeType, NativeValue, SqlType, Value, mapper};
use std::sync::Arc;

/// A placeholder reference: `"$id"`, `"id"` or a zero-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRef {
    Name(String),
    Index(usize),
}

impl From<&str> for ParamRef {
    fn from(name: &str) -> Self {
        ParamRef::Name(name.to_string())
    }
}

impl From<String> for ParamRef {
    fn from(name: String) -> Self {
        ParamRef::Name(name)
    }
}

impl From<usize> for ParamRef {
    fn from(index: usize) -> Self {
        ParamRef::Index(index)
    }
}

/// A prepared statement bound to a connection.
///
/// # Example
/// ```ignore
/// let mut stmt = conn.create_statement("UPSERT INTO users (id, name) VALUES ($id, $name)")?;
/// stmt.bind("$id", 1u64)?.bind("$name", "a")?;
/// stmt.execute().await?.rows().await?;
/// ```
pub struct Statement<'c> {
    conn: &'c mut Connection,
    template: Arc<QueryTemplate>,
    bindings: Vec<Option<NativeValue>>,
    fetch_size: Option<usize>,
}

impl<'c> Statement<'c> {
    pub(crate) fn new(conn: &'c mut Connection, template: Arc<QueryTemplate>) -> Self {
        let bindings = vec![None; template.param_count()];
        Self {
            conn,
            template,
            bindings,
            fetch_size: None,
        }
    }

    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }

    /// Bind a value, converting it to the declared type when there is one.
    pub fn bind(
        &mut self,
        param: impl Into<ParamRef>,
        value: impl Into<Value>,
    ) -> DriverResult<&mut Self> {
        let index = self.slot(&param.into())?;
        let p = &self.template.params()[index];
        let value = value.into();
        let native = match &p.declared {
            Some(ty) => mapper::to_backend_as(&value, ty, &p.name)?,
            None => mapper::to_backend(&value)?,
        };
        self.bindings[index] = Some(native);
        Ok(self)
    }

    /// Bind a value as an explicit native type.
    pub fn bind_typed(
        &mut self,
        param: impl Into<ParamRef>,
        value: impl Into<Value>,
        ty: &NativeType,
    ) -> DriverResult<&mut Self> {
        let index = self.slot(&param.into())?;
        let p = &self.template.params()[index];
        if let Some(declared) = &p.declared
            && declared.inner() != ty.inner()
        {
            return Err(DriverError::mismatch(&p.name, declared, ty));
        }
        let native = mapper::to_backend_as(&value.into(), ty, &p.name)?;
        self.bindings[index] = Some(native);
        Ok(self)
    }

    /// Bind a value as the native type carrying `ty`.
    pub fn bind_sql(
        &mut self,
        param: impl Into<ParamRef>,
        value: impl Into<Value>,
        ty: SqlType,
    ) -> DriverResult<&mut Self> {
        let value = value.into();
        if value.is_null() {
            return self.bind_null(param, ty);
        }
        let native_ty = ty
            .native_type()
            .ok_or_else(|| DriverError::UnsupportedType(format!("{:?}", ty)))?;
        self.bind_typed(param, value, &native_ty)
    }

    /// Bind NULL of the given SQL type.
    pub fn bind_null(&mut self, param: impl Into<ParamRef>, ty: SqlType) -> DriverResult<&mut Self> {
        let index = self.slot(&param.into())?;
        let p = &self.template.params()[index];
        let native_ty = ty
            .native_type()
            .ok_or_else(|| DriverError::UnsupportedType(format!("{:?}", ty)))?;
        let native = match &p.declared {
            Some(declared) if !declared.is_optional() => {
                return Err(DriverError::mismatch(&p.name, declared, "NULL"));
            }
            Some(declared) if declared.inner() != &native_ty => {
                return Err(DriverError::mismatch(&p.name, declared, &native_ty));
            }
            Some(declared) => NativeValue::Empty(declared.inner().clone()),
            None => NativeValue::Empty(native_ty),
        };
        self.bindings[index] = Some(native);
        Ok(self)
    }

    /// Rows per part to ask the backend for.
    pub fn fetch_size(&mut self, rows: usize) -> &mut Self {
        self.fetch_size = Some(rows.max(1));
        self
    }

    /// Forget all bound values.
    pub fn clear_bindings(&mut self) {
        self.bindings.iter_mut().for_each(|b| *b = None);
    }

    /// Execute with the current bindings. Each call produces an independent
    /// result; the query is sent when the result's rows are first requested.
    pub async fn execute(&mut self) -> DriverResult<QueryResult<'_>> {
        if let Some(index) = self.bindings.iter().position(Option::is_none) {
            return Err(DriverError::UnboundParameter(
                self.template.params()[index].name.clone(),
            ));
        }
        let params = self
            .template
            .params()
            .iter()
            .zip(&self.bindings)
            .filter_map(|(p, v)| v.clone().map(|v| (p.name.clone(), v)))
            .collect();
        let config = self.conn.config();
        let request = QueryRequest {
            text: self.template.text().to_string(),
            params,
            fetch_size: self.fetch_size.or(config.fetch_size),
            keep_in_cache: config.keep_in_query_cache,
        };
        self.conn.start_unit(request).await
    }

    fn slot(&self, param: &ParamRef) -> DriverResult<usize> {
        match param {
            ParamRef::Name(name) => self
                .template
                .position(name)
                .ok_or_else(|| DriverError::UnknownParameter(name.clone())),
            ParamRef::Index(i) if *i < self.bindings.len() => Ok(*i),
            ParamRef::Index(i) => Err(DriverError::UnknownParameter(format!(
                "index {} (statement has {} parameters)",
                i,
                self.bindings.len()
            ))),
        }
    }
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("name", &self.template.name())
            .field("params", &self.template.param_count())
            .field(
                "bound",
                &self.bindings.iter().filter(|b| b.is_some()).count(),
            )
            .finish()
    }
}

/// Parameterless statements sent together as one query.
pub struct Batch<'c> {
    conn: &'c mut Connection,
    statements: Vec<String>,
}

impl<'c> Batch<'c> {
    pub(crate) fn new(conn: &'c mut Connection) -> Self {
        Self {
            conn,
            statements: Vec::new(),
        }
    }

    pub fn add(&mut self, sql: impl Into<String>) -> &mut Self {
        self.statements.push(sql.into());
        self
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Text sent for the batch.
    pub fn text(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.trim().trim_end_matches(';'))
            .collect::<Vec<_>>()
            .join(";")
    }

    pub async fn execute(&mut self) -> DriverResult<QueryResult<'_>> {
        if self.statements.is_empty() {
            return Err(DriverError::invalid_state("batch is empty"));
        }
        let text = self.text();
        let template = QueryTemplate::parse(&text);
        if let Some(p) = template.params().first() {
            return Err(DriverError::UnboundParameter(p.name.clone()));
        }
        let config = self.conn.config();
        let request = QueryRequest {
            text,
            params: Vec::new(),
            fetch_size: config.fetch_size,
            keep_in_cache: config.keep_in_query_cache,
        };
        self.conn.start_unit(request).await
    }
}

impl std::fmt::Debug for Batch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch").field("statements", &self.statements).finish()
    }
}
