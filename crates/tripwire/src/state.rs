//! Schema snapshots.
//!
//! A [`ProjectState`] is a point-in-time description of every model: its
//! fields and its options bag, which carries the constraint lists. The
//! autodetector diffs two snapshots; migration operations mutate one.

use std::fmt;

use indexmap::IndexMap;
use tripwire_config::{Config, DEFAULT_OPTION_NAME};

use crate::constraint::Constraint;
use crate::{Error, Result};

/// Identity of a model: app label plus lowercased model name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub app_label: String,
    pub model_name: String,
}

impl ModelKey {
    pub fn new(app_label: &str, model_name: &str) -> Self {
        Self {
            app_label: app_label.to_string(),
            model_name: model_name.to_lowercase(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model_name)
    }
}

/// Postgres column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgType {
    SmallInt,
    Integer,
    BigInt,
    Serial,
    BigSerial,
    Real,
    DoublePrecision,
    Boolean,
    Text,
    Varchar(u32),
    Timestamptz,
    Date,
    Uuid,
}

impl PgType {
    /// Type of a column referencing a column of this type.
    pub fn referenced_as(self) -> PgType {
        match self {
            PgType::Serial => PgType::Integer,
            PgType::BigSerial => PgType::BigInt,
            other => other,
        }
    }
}

impl fmt::Display for PgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgType::SmallInt => write!(f, "SMALLINT"),
            PgType::Integer => write!(f, "INTEGER"),
            PgType::BigInt => write!(f, "BIGINT"),
            PgType::Serial => write!(f, "SERIAL"),
            PgType::BigSerial => write!(f, "BIGSERIAL"),
            PgType::Real => write!(f, "REAL"),
            PgType::DoublePrecision => write!(f, "DOUBLE PRECISION"),
            PgType::Boolean => write!(f, "BOOLEAN"),
            PgType::Text => write!(f, "TEXT"),
            PgType::Varchar(n) => write!(f, "VARCHAR({n})"),
            PgType::Timestamptz => write!(f, "TIMESTAMPTZ"),
            PgType::Date => write!(f, "DATE"),
            PgType::Uuid => write!(f, "UUID"),
        }
    }
}

/// A model field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub pg_type: PgType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// Default value as a SQL expression.
    pub default: Option<String>,
    /// Target of a foreign key. The column is then named `<name>_id`.
    pub relation: Option<ModelKey>,
}

impl Field {
    pub fn new(name: impl Into<String>, pg_type: PgType) -> Self {
        Self {
            name: name.into(),
            pg_type,
            nullable: false,
            primary_key: false,
            unique: false,
            default: None,
            relation: None,
        }
    }

    /// An auto-incrementing integer primary key.
    pub fn auto(name: impl Into<String>) -> Self {
        Self::new(name, PgType::Serial).primary_key()
    }

    /// A foreign key to another model's primary key.
    ///
    /// The column type follows the target's primary key; `Integer` is only
    /// used when the target is not part of the snapshot.
    pub fn foreign_key(name: impl Into<String>, target: ModelKey) -> Self {
        Self {
            relation: Some(target),
            ..Self::new(name, PgType::Integer)
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, sql: impl Into<String>) -> Self {
        self.default = Some(sql.into());
        self
    }

    /// Database column name.
    pub fn column(&self) -> String {
        match self.relation {
            Some(_) => format!("{}_id", self.name),
            None => self.name.clone(),
        }
    }
}

/// The options bag of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOptions {
    pub db_table: Option<String>,
    /// Unmanaged models are tracked in snapshots but never touched in the
    /// database.
    pub managed: bool,
    /// Constraint lists keyed by option name.
    pub constraints: IndexMap<String, Vec<Constraint>>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            db_table: None,
            managed: true,
            constraints: IndexMap::new(),
        }
    }
}

/// A model in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelState {
    pub app_label: String,
    pub name: String,
    pub fields: Vec<Field>,
    pub options: ModelOptions,
}

impl ModelState {
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            fields: Vec::new(),
            options: ModelOptions::default(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_table(mut self, db_table: impl Into<String>) -> Self {
        self.options.db_table = Some(db_table.into());
        self
    }

    pub fn unmanaged(mut self) -> Self {
        self.options.managed = false;
        self
    }

    /// Declare a constraint under the default option name.
    pub fn with_constraint(self, constraint: Constraint) -> Self {
        self.with_constraint_in(DEFAULT_OPTION_NAME, constraint)
    }

    /// Declare a constraint under a specific option name.
    pub fn with_constraint_in(mut self, option: &str, constraint: Constraint) -> Self {
        self.options
            .constraints
            .entry(option.to_string())
            .or_default()
            .push(constraint);
        self
    }

    pub fn key(&self) -> ModelKey {
        ModelKey::new(&self.app_label, &self.name)
    }

    pub fn name_lower(&self) -> String {
        self.name.to_lowercase()
    }

    /// Table name: the explicit `db_table`, or `<app_label>_<model>`.
    pub fn db_table(&self) -> String {
        match &self.options.db_table {
            Some(table) => table.clone(),
            None => format!("{}_{}", self.app_label, self.name_lower()),
        }
    }

    /// Find a field by name or by column name.
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.column() == name))
    }

    pub fn pk(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// All declared constraints, list by list, in declaration order.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.options.constraints.values().flatten()
    }

    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints().find(|c| c.name() == name)
    }

    /// The same model with every constraint list removed.
    pub fn without_constraints(&self) -> ModelState {
        let mut model = self.clone();
        model.options.constraints.clear();
        model
    }

    fn validate(&self, config: &Config) -> Result<()> {
        for key in self.options.constraints.keys() {
            if !config.accepts_option(key) {
                return Err(Error::UnknownOption {
                    model: self.key().to_string(),
                    option: key.clone(),
                });
            }
        }
        let mut seen = Vec::new();
        for constraint in self.constraints() {
            if seen.contains(&constraint.name()) {
                return Err(Error::DuplicateConstraint {
                    model: self.key().to_string(),
                    name: constraint.name().to_string(),
                });
            }
            seen.push(constraint.name());
        }
        Ok(())
    }
}

/// A snapshot of every model, plus the configuration it was built with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectState {
    config: Config,
    models: IndexMap<ModelKey, ModelState>,
}

impl ProjectState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            models: IndexMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelState> {
        self.models.values()
    }

    pub fn contains(&self, key: &ModelKey) -> bool {
        self.models.contains_key(key)
    }

    pub fn get(&self, key: &ModelKey) -> Option<&ModelState> {
        self.models.get(key)
    }

    /// Look a model up by app label and (case-insensitive) name.
    pub fn model(&self, app_label: &str, model_name: &str) -> Result<&ModelState> {
        self.models
            .get(&ModelKey::new(app_label, model_name))
            .ok_or_else(|| Error::model_not_found(app_label, model_name))
    }

    pub fn model_mut(&mut self, app_label: &str, model_name: &str) -> Result<&mut ModelState> {
        self.models
            .get_mut(&ModelKey::new(app_label, model_name))
            .ok_or_else(|| Error::model_not_found(app_label, model_name))
    }

    /// Register a model. Its option keys must be accepted by the config and
    /// its constraint names unique.
    pub fn add_model(&mut self, model: ModelState) -> Result<()> {
        let key = model.key();
        if self.models.contains_key(&key) {
            return Err(Error::DuplicateModel(key.to_string()));
        }
        model.validate(&self.config)?;
        self.models.insert(key, model);
        Ok(())
    }

    /// Builder form of [`add_model`](Self::add_model).
    pub fn with_model(mut self, model: ModelState) -> Result<Self> {
        self.add_model(model)?;
        Ok(self)
    }

    pub fn remove_model(&mut self, app_label: &str, model_name: &str) -> Result<ModelState> {
        self.models
            .shift_remove(&ModelKey::new(app_label, model_name))
            .ok_or_else(|| Error::model_not_found(app_label, model_name))
    }

    /// Rename a model and repoint every foreign key targeting it.
    pub fn rename_model(&mut self, app_label: &str, old_name: &str, new_name: &str) -> Result<()> {
        let old_key = ModelKey::new(app_label, old_name);
        let new_key = ModelKey::new(app_label, new_name);
        if old_key != new_key && self.models.contains_key(&new_key) {
            return Err(Error::DuplicateModel(new_key.to_string()));
        }
        let mut model = self.remove_model(app_label, old_name)?;
        model.name = new_name.to_string();
        self.models.insert(new_key.clone(), model);

        for model in self.models.values_mut() {
            for field in &mut model.fields {
                if field.relation.as_ref() == Some(&old_key) {
                    field.relation = Some(new_key.clone());
                }
            }
        }
        Ok(())
    }

    /// The constraint list a new constraint is appended to.
    pub fn constraints_mut(
        &mut self,
        app_label: &str,
        model_name: &str,
    ) -> Result<&mut Vec<Constraint>> {
        let option = self.config.option_name().to_string();
        let model = self.model_mut(app_label, model_name)?;
        Ok(model.options.constraints.entry(option).or_default())
    }

    /// Remove a constraint by name from whichever list holds it.
    pub fn remove_constraint(
        &mut self,
        app_label: &str,
        model_name: &str,
        name: &str,
    ) -> Result<Constraint> {
        let model = self.model_mut(app_label, model_name)?;
        for list in model.options.constraints.values_mut() {
            if let Some(pos) = list.iter().position(|c| c.name() == name) {
                return Ok(list.remove(pos));
            }
        }
        Err(Error::UnknownConstraint {
            model: ModelKey::new(app_label, model_name).to_string(),
            name: name.to_string(),
        })
    }

    /// Re-validate a model after its options were mutated in place: option
    /// keys, constraint name uniqueness and foreign key targets.
    pub fn reload_model(&mut self, app_label: &str, model_name: &str) -> Result<()> {
        let model = self.model(app_label, model_name)?;
        model.validate(&self.config)?;
        for field in &model.fields {
            if let Some(target) = &field.relation
                && !self.models.contains_key(target)
            {
                return Err(Error::model_not_found(&target.app_label, &target.model_name));
            }
        }
        Ok(())
    }

    /// Sort models by key. Snapshots compare equal regardless of insertion
    /// order, this only affects iteration.
    pub fn sorted(mut self) -> Self {
        self.models.sort_keys();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::M;

    fn author() -> ModelState {
        ModelState::new("test_app", "Author")
            .with_field(Field::auto("id"))
            .with_field(Field::new("name", PgType::Varchar(200)))
    }

    fn pk_is(n: i64, name: &str) -> Constraint {
        Constraint::queryset(M::new().objects().filter([("pk", n)]), name).unwrap()
    }

    #[test]
    fn default_table_name() {
        assert_eq!(author().db_table(), "test_app_author");
        assert_eq!(author().with_table("authors").db_table(), "authors");
    }

    #[test]
    fn foreign_key_column() {
        let field = Field::foreign_key("pizza", ModelKey::new("shop", "Pizza"));
        assert_eq!(field.column(), "pizza_id");
        assert_eq!(field.relation, Some(ModelKey::new("shop", "pizza")));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let state = ProjectState::default().with_model(author()).unwrap();
        assert_eq!(state.model("test_app", "author").unwrap().name, "Author");
        assert!(matches!(
            state.model("test_app", "Book"),
            Err(Error::ModelNotFound { .. })
        ));
    }

    #[test]
    fn rejects_duplicates() {
        let mut state = ProjectState::default();
        state.add_model(author()).unwrap();
        assert!(matches!(
            state.add_model(author()),
            Err(Error::DuplicateModel(_))
        ));

        let dup = author()
            .with_constraint(pk_is(1, "1"))
            .with_constraint(pk_is(2, "1"));
        let err = ProjectState::default().with_model(dup).unwrap_err();
        assert!(matches!(err, Error::DuplicateConstraint { .. }));
    }

    #[test]
    fn option_names_come_from_config() {
        let model = author().with_constraint_in("constraint_triggers", pk_is(1, "1"));
        let err = ProjectState::default()
            .with_model(model.clone())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownOption { .. }));

        let config = Config {
            option_name: Some("constraint_triggers".into()),
            ..Default::default()
        };
        let mut state = ProjectState::new(config).with_model(model).unwrap();
        state
            .constraints_mut("test_app", "Author")
            .unwrap()
            .push(pk_is(2, "2"));
        let model = state.model("test_app", "Author").unwrap();
        assert_eq!(model.options.constraints.len(), 1);
        assert_eq!(model.constraints().count(), 2);
    }

    #[test]
    fn rename_repoints_foreign_keys() {
        let book = ModelState::new("test_app", "Book")
            .with_field(Field::auto("id"))
            .with_field(Field::foreign_key("author", ModelKey::new("test_app", "Author")));
        let mut state = ProjectState::default()
            .with_model(author())
            .unwrap()
            .with_model(book)
            .unwrap();

        state.rename_model("test_app", "Author", "Writer").unwrap();

        let book = state.model("test_app", "Book").unwrap();
        assert_eq!(
            book.fields[1].relation,
            Some(ModelKey::new("test_app", "writer"))
        );
        assert_eq!(state.model("test_app", "Writer").unwrap().db_table(), "test_app_writer");
        state.reload_model("test_app", "Book").unwrap();
    }

    #[test]
    fn reload_catches_in_place_edits() {
        let mut state = ProjectState::default().with_model(author()).unwrap();
        state
            .constraints_mut("test_app", "Author")
            .unwrap()
            .extend([pk_is(1, "1"), pk_is(2, "1")]);
        assert!(matches!(
            state.reload_model("test_app", "Author"),
            Err(Error::DuplicateConstraint { .. })
        ));

        state.remove_constraint("test_app", "Author", "1").unwrap();
        state.reload_model("test_app", "Author").unwrap();
        assert!(matches!(
            state.remove_constraint("test_app", "Author", "nope"),
            Err(Error::UnknownConstraint { .. })
        ));
    }
}
