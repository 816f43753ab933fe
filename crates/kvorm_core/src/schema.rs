//! Entity type declarations.

use crate::hooks::{EntityHook, HookDecision, HookEvent};
use crate::property::PropertyDef;
use crate::relation::RelationDef;
use crate::types::qualify;
use std::fmt;
use std::sync::Arc;

/// Declaration of an entity type.
///
/// Built with [`EntitySchema::builder`] and handed to
/// [`crate::Database::register_type`].
///
/// # Example
///
/// ```
/// use kvorm_core::{EntitySchema, PropertyDef, RelationDef};
///
/// let person = EntitySchema::builder("Person")
///     .property(PropertyDef::string("name"))
///     .property(PropertyDef::integer("age").min(0))
///     .relation(RelationDef::many_to_one("mother", "Person", "children"))
///     .relation(RelationDef::one_to_many("children", "Person", "mother"))
///     .alias("name")
///     .build();
/// assert_eq!(person.qualified_name(), "Person");
/// ```
#[derive(Clone)]
pub struct EntitySchema {
    /// Bare type name.
    pub name: String,
    /// Namespace, or `None` for the root namespace.
    pub namespace: Option<String>,
    /// Declared scalar properties, in declaration order.
    pub properties: Vec<PropertyDef>,
    /// Declared relationship fields, in declaration order.
    pub relations: Vec<RelationDef>,
    /// Property whose values index entities by alias.
    pub alias: Option<String>,
    /// Mutation hook.
    pub hook: Option<Arc<dyn EntityHook>>,
    /// Parent type name as declared, bare or qualified.
    pub extends: Option<String>,
    /// Whether entities carry owner, creator, updater and timestamp fields.
    pub timestamped: bool,
    /// Qualified name of the resolved parent. Filled in at registration.
    pub(crate) parent: Option<String>,
}

impl EntitySchema {
    /// Starts declaring a type.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            schema: EntitySchema {
                name: name.into(),
                namespace: None,
                properties: Vec::new(),
                relations: Vec::new(),
                alias: None,
                hook: None,
                extends: None,
                timestamped: false,
                parent: None,
            },
        }
    }

    /// Returns `namespace::Name`, or `Name` in the root namespace.
    pub fn qualified_name(&self) -> String {
        qualify(self.namespace.as_deref(), &self.name)
    }

    /// Looks up a declared property.
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up a declared relationship field.
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Returns the qualified name of the parent type, once registered.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Returns true if `field` is declared as a property or relationship.
    pub fn declares(&self, field: &str) -> bool {
        self.property(field).is_some() || self.relation(field).is_some()
    }
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("properties", &self.properties)
            .field("relations", &self.relations)
            .field("alias", &self.alias)
            .field("hook", &self.hook.as_ref().map(|_| "<hook>"))
            .field("extends", &self.extends)
            .field("timestamped", &self.timestamped)
            .finish()
    }
}

/// Builder for [`EntitySchema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: EntitySchema,
}

impl SchemaBuilder {
    /// Places the type in a namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.schema.namespace = Some(namespace.into());
        self
    }

    /// Declares a scalar property.
    #[must_use]
    pub fn property(mut self, property: PropertyDef) -> Self {
        self.schema.properties.push(property);
        self
    }

    /// Declares a relationship field.
    #[must_use]
    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.schema.relations.push(relation);
        self
    }

    /// Indexes entities by the values of a string or integer property.
    #[must_use]
    pub fn alias(mut self, field: impl Into<String>) -> Self {
        self.schema.alias = Some(field.into());
        self
    }

    /// Adds owner, creator, updater and timestamp system fields.
    #[must_use]
    pub fn timestamped(mut self) -> Self {
        self.schema.timestamped = true;
        self
    }

    /// Inherits the properties, alias, hook and timestamping of a registered
    /// type. Relationships are not inherited.
    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.schema.extends = Some(parent.into());
        self
    }

    /// Installs a mutation hook.
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn EntityHook>) -> Self {
        self.schema.hook = Some(hook);
        self
    }

    /// Installs a closure as the mutation hook.
    #[must_use]
    pub fn on_event<F>(self, hook: F) -> Self
    where
        F: Fn(&HookEvent<'_>) -> HookDecision + Send + Sync + 'static,
    {
        self.hook(Arc::new(hook))
    }

    /// Finishes the declaration.
    #[must_use]
    pub fn build(self) -> EntitySchema {
        self.schema
    }
}
