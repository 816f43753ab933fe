//! Registered entity types and name resolution.

use crate::error::{CoreError, CoreResult};
use crate::property::PropertyKind;
use crate::schema::EntitySchema;
use crate::types::{qualify, split_qualified, validate_namespace, validate_type_name};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`TypeRegistry::register`].
#[derive(Debug, Clone)]
pub(crate) struct Registration {
    /// The registered (or previously registered) schema.
    pub schema: Arc<EntitySchema>,
    /// False if the qualified name was already registered.
    pub is_new: bool,
}

/// Maps qualified type names to their resolved schemas.
///
/// Besides the exact index, the registry keeps every qualified name under its
/// bare name in registration order, so lookups by bare name can prefer the
/// first registrant and relationship resolution can detect ambiguity.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<EntitySchema>>,
    by_bare_name: HashMap<String, Vec<String>>,
    children: HashMap<String, Vec<String>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type.
    ///
    /// Registering an already-known qualified name returns the existing
    /// schema unchanged. Parent properties, alias, hook and timestamping are
    /// merged into the child, with the child's own declarations taking
    /// precedence. Parent relationships are not inherited.
    pub(crate) fn register(&mut self, schema: EntitySchema) -> CoreResult<Registration> {
        validate_type_name(&schema.name)?;
        if let Some(ns) = &schema.namespace {
            validate_namespace(ns)?;
        }

        let qualified = schema.qualified_name();
        if let Some(existing) = self.types.get(&qualified) {
            debug!(type_name = %qualified, "type already registered");
            return Ok(Registration {
                schema: Arc::clone(existing),
                is_new: false,
            });
        }

        let schema = self.inherit(schema)?;
        check_declarations(&schema)?;

        let schema = Arc::new(schema);
        let bare = self.by_bare_name.entry(schema.name.clone()).or_default();
        if let Some(first) = bare.first() {
            warn!(
                type_name = %qualified,
                existing = %first,
                "bare type name already registered; keeping first registrant"
            );
        }
        bare.push(qualified.clone());

        if let Some(parent) = schema.parent() {
            self.children
                .entry(parent.to_string())
                .or_default()
                .push(qualified.clone());
        }

        info!(
            type_name = %qualified,
            properties = schema.properties.len(),
            relations = schema.relations.len(),
            "registered entity type"
        );
        self.types.insert(qualified, Arc::clone(&schema));
        Ok(Registration {
            schema,
            is_new: true,
        })
    }

    /// Resolves a type name strictly.
    ///
    /// Tries the exact qualified name, then the name inside `hint`'s
    /// namespace, then a bare-name match across all namespaces.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Resolution`] if the name is unknown, or if the
    /// bare-name fallback matches types in more than one namespace.
    pub fn resolve(&self, name: &str, hint: Option<&str>) -> CoreResult<Arc<EntitySchema>> {
        if let Some(schema) = self.types.get(name) {
            return Ok(Arc::clone(schema));
        }
        let (ns, bare) = split_qualified(name);
        if ns.is_some() {
            return Err(CoreError::resolution(format!("unknown type '{name}'")));
        }
        if let Some(hint) = hint {
            if let Some(schema) = self.types.get(&qualify(Some(hint), bare)) {
                return Ok(Arc::clone(schema));
            }
        }
        match self.by_bare_name.get(bare).map(Vec::as_slice) {
            Some([only]) => self
                .types
                .get(only)
                .cloned()
                .ok_or_else(|| CoreError::consistency(format!("bare index names '{only}'"))),
            Some(candidates) if candidates.len() > 1 => Err(CoreError::resolution(format!(
                "type name '{name}' is ambiguous: {}",
                candidates.join(", ")
            ))),
            _ => Err(CoreError::resolution(format!("unknown type '{name}'"))),
        }
    }

    /// Looks a type up by qualified name, falling back to the first type
    /// registered under a bare name.
    pub fn lookup(&self, name: &str) -> Option<Arc<EntitySchema>> {
        if let Some(schema) = self.types.get(name) {
            return Some(Arc::clone(schema));
        }
        let first = self.by_bare_name.get(name)?.first()?;
        self.types.get(first).cloned()
    }

    /// Returns the schema registered under an exact qualified name.
    pub fn get(&self, qualified: &str) -> Option<Arc<EntitySchema>> {
        self.types.get(qualified).cloned()
    }

    /// Returns true if a qualified name is registered.
    pub fn contains(&self, qualified: &str) -> bool {
        self.types.contains_key(qualified)
    }

    /// Returns all registered qualified names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns every registered descendant of a type, depth first.
    pub fn descendants(&self, qualified: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = vec![qualified];
        while let Some(current) = stack.pop() {
            for child in self.children.get(current).into_iter().flatten() {
                if seen.insert(child.as_str()) {
                    out.push(child.clone());
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn inherit(&self, mut schema: EntitySchema) -> CoreResult<EntitySchema> {
        let Some(extends) = schema.extends.clone() else {
            return Ok(schema);
        };
        let parent = self.resolve(&extends, schema.namespace.as_deref())?;

        // Relationships are not inherited: an inverse field names exactly one
        // type, so a subtype declares its own.
        let mut properties: Vec<_> = parent
            .properties
            .iter()
            .filter(|p| !schema.declares(&p.name))
            .cloned()
            .collect();
        properties.append(&mut schema.properties);

        schema.properties = properties;
        schema.alias = schema.alias.or_else(|| parent.alias.clone());
        schema.hook = schema.hook.or_else(|| parent.hook.clone());
        schema.timestamped |= parent.timestamped;
        schema.parent = Some(parent.qualified_name());
        Ok(schema)
    }
}

fn check_declarations(schema: &EntitySchema) -> CoreResult<()> {
    let qualified = schema.qualified_name();
    let mut seen = HashSet::new();
    let names = schema
        .properties
        .iter()
        .map(|p| p.name.as_str())
        .chain(schema.relations.iter().map(|r| r.name.as_str()));
    for name in names {
        if name.is_empty() || name.starts_with('_') {
            return Err(CoreError::invalid_operation(format!(
                "{qualified}: field name {name:?} is reserved"
            )));
        }
        if !seen.insert(name) {
            return Err(CoreError::invalid_operation(format!(
                "{qualified}: field '{name}' declared twice"
            )));
        }
    }

    for relation in &schema.relations {
        if relation.target.is_empty() || relation.inverse.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "{qualified}.{}: relation needs a target and an inverse field",
                relation.name
            )));
        }
    }

    if let Some(alias) = &schema.alias {
        let property = schema.property(alias).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "{qualified}: alias field '{alias}' is not a declared property"
            ))
        })?;
        if !matches!(
            property.kind,
            PropertyKind::String { .. } | PropertyKind::Integer { .. }
        ) {
            return Err(CoreError::invalid_operation(format!(
                "{qualified}: alias field '{alias}' must be a string or integer property"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyDef;
    use crate::relation::RelationDef;

    fn person(ns: Option<&str>) -> EntitySchema {
        let builder = EntitySchema::builder("Person").property(PropertyDef::string("name"));
        match ns {
            Some(ns) => builder.namespace(ns).build(),
            None => builder.build(),
        }
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = TypeRegistry::new();
        assert!(registry.register(person(None)).unwrap().is_new);
        assert!(!registry.register(person(None)).unwrap().is_new);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn exact_name_preferred_over_bare_fallback() {
        let mut registry = TypeRegistry::new();
        registry.register(person(Some("hr"))).unwrap();
        registry.register(person(None)).unwrap();

        assert_eq!(registry.resolve("Person", None).unwrap().qualified_name(), "Person");
        assert_eq!(
            registry.resolve("hr::Person", None).unwrap().qualified_name(),
            "hr::Person"
        );
    }

    #[test]
    fn hint_namespace_wins_before_bare_fallback() {
        let mut registry = TypeRegistry::new();
        registry.register(person(Some("hr"))).unwrap();
        registry.register(person(Some("crm"))).unwrap();

        let resolved = registry.resolve("Person", Some("crm")).unwrap();
        assert_eq!(resolved.qualified_name(), "crm::Person");
    }

    #[test]
    fn ambiguous_bare_name_fails_resolution() {
        let mut registry = TypeRegistry::new();
        registry.register(person(Some("hr"))).unwrap();
        registry.register(person(Some("crm"))).unwrap();

        let err = registry.resolve("Person", None).unwrap_err();
        assert!(matches!(err, CoreError::Resolution { .. }));
        // lookup keeps the first registrant
        assert_eq!(
            registry.lookup("Person").unwrap().qualified_name(),
            "hr::Person"
        );
    }

    #[test]
    fn unique_bare_name_resolves_across_namespaces() {
        let mut registry = TypeRegistry::new();
        registry.register(person(Some("hr"))).unwrap();
        assert_eq!(
            registry.resolve("Person", Some("other")).unwrap().qualified_name(),
            "hr::Person"
        );
        assert!(registry.resolve("crm::Person", None).is_err());
        assert!(registry.resolve("Nobody", None).is_err());
    }

    #[test]
    fn child_inherits_and_overrides() {
        let mut registry = TypeRegistry::new();
        let animal = EntitySchema::builder("Animal")
            .property(PropertyDef::string("name"))
            .property(PropertyDef::integer("legs").default(4))
            .alias("name")
            .build();
        registry.register(animal).unwrap();

        let bird = EntitySchema::builder("Bird")
            .extends("Animal")
            .property(PropertyDef::integer("legs").default(2))
            .property(PropertyDef::boolean("flies"))
            .build();
        let bird = registry.register(bird).unwrap().schema;

        assert_eq!(bird.parent(), Some("Animal"));
        assert_eq!(bird.alias.as_deref(), Some("name"));
        assert_eq!(bird.properties.len(), 3);
        assert_eq!(
            bird.property("legs").unwrap().default,
            Some(kvorm_codec::Value::Integer(2))
        );
        assert_eq!(registry.descendants("Animal"), vec!["Bird".to_string()]);
    }

    #[test]
    fn child_does_not_inherit_relations() {
        let mut registry = TypeRegistry::new();
        let person = EntitySchema::builder("Person")
            .property(PropertyDef::string("name"))
            .relation(RelationDef::many_to_one("mother", "Person", "children"))
            .relation(RelationDef::one_to_many("children", "Person", "mother"))
            .build();
        registry.register(person).unwrap();

        let employee = EntitySchema::builder("Employee")
            .extends("Person")
            .relation(RelationDef::many_to_one("manager", "Employee", "reports"))
            .relation(RelationDef::one_to_many("reports", "Employee", "manager"))
            .build();
        let employee = registry.register(employee).unwrap().schema;

        assert!(employee.property("name").is_some());
        assert!(employee.relation("mother").is_none());
        assert!(employee.relation("children").is_none());
        let names: Vec<&str> = employee.relations.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["manager", "reports"]);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut registry = TypeRegistry::new();
        let orphan = EntitySchema::builder("Orphan").extends("Missing").build();
        assert!(matches!(
            registry.register(orphan),
            Err(CoreError::Resolution { .. })
        ));
    }

    #[test]
    fn invalid_declarations_are_rejected() {
        let mut registry = TypeRegistry::new();
        let duplicate = EntitySchema::builder("Dup")
            .property(PropertyDef::string("x"))
            .relation(RelationDef::one_to_one("x", "Dup", "x"))
            .build();
        assert!(registry.register(duplicate).is_err());

        let bad_alias = EntitySchema::builder("Flag")
            .property(PropertyDef::boolean("on"))
            .alias("on")
            .build();
        assert!(registry.register(bad_alias).is_err());

        let reserved = EntitySchema::builder("R")
            .property(PropertyDef::string("_id"))
            .build();
        assert!(registry.register(reserved).is_err());

        assert!(registry.register(EntitySchema::builder("_hidden").build()).is_err());
        assert!(registry.is_empty());
    }
}
