use graphql_parser::query::{Selection, parse_query};
use graphql_parser::schema::{
    Definition, Directive, TypeDefinition, TypeExtension, Value, parse_schema,
};
use std::collections::{BTreeMap, HashMap};

use crate::error::PlanningError;

/// `@key` and `@requires` field sets declared in a federated service SDL.
#[derive(Clone, Debug, Default)]
pub struct FederationMetadata {
    keys: BTreeMap<String, Vec<String>>,
    requires: HashMap<(String, String), Vec<String>>,
}

impl FederationMetadata {
    pub fn parse(service_sdl: &str) -> Result<Self, PlanningError> {
        let document = parse_schema::<String>(service_sdl)
            .map_err(|e| PlanningError::FederationSdl(e.to_string()))?;
        let mut metadata = FederationMetadata::default();

        for definition in &document.definitions {
            let (type_name, directives, fields) = match definition {
                Definition::TypeDefinition(TypeDefinition::Object(obj)) => {
                    (&obj.name, &obj.directives, &obj.fields)
                }
                Definition::TypeDefinition(TypeDefinition::Interface(iface)) => {
                    (&iface.name, &iface.directives, &iface.fields)
                }
                Definition::TypeExtension(TypeExtension::Object(obj)) => {
                    (&obj.name, &obj.directives, &obj.fields)
                }
                Definition::TypeExtension(TypeExtension::Interface(iface)) => {
                    (&iface.name, &iface.directives, &iface.fields)
                }
                _ => continue,
            };

            // Only the first key is used to build representations.
            if !metadata.keys.contains_key(type_name) {
                if let Some(key) = field_set_argument(directives, "key")? {
                    metadata.keys.insert(type_name.clone(), key);
                }
            }
            for field in fields {
                if let Some(requires) = field_set_argument(&field.directives, "requires")? {
                    metadata
                        .requires
                        .insert((type_name.clone(), field.name.clone()), requires);
                }
            }
        }

        Ok(metadata)
    }

    pub fn key_fields(&self, type_name: &str) -> Option<&[String]> {
        self.keys.get(type_name).map(Vec::as_slice)
    }

    /// Fields a representation for `type_name` must carry to resolve `field_name`:
    /// the key fields followed by any `@requires` fields. Empty when the type has no key.
    pub fn required_fields(&self, type_name: &str, field_name: &str) -> Vec<String> {
        let Some(key) = self.keys.get(type_name) else {
            return Vec::new();
        };
        let mut fields = key.clone();
        if let Some(requires) = self
            .requires
            .get(&(type_name.to_string(), field_name.to_string()))
        {
            for field in requires {
                if !fields.contains(field) {
                    fields.push(field.clone());
                }
            }
        }
        fields
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

fn field_set_argument(
    directives: &[Directive<'_, String>],
    directive_name: &str,
) -> Result<Option<Vec<String>>, PlanningError> {
    let Some(directive) = directives.iter().find(|d| d.name == directive_name) else {
        return Ok(None);
    };
    match directive.arguments.iter().find(|(name, _)| name == "fields") {
        Some((_, Value::String(fields))) => parse_field_set(fields).map(Some),
        _ => Err(PlanningError::FederationSdl(format!(
            "@{directive_name} directive without a fields argument"
        ))),
    }
}

/// Top level field names of a field set such as `"id"` or `"upc sku"`.
pub fn parse_field_set(fields: &str) -> Result<Vec<String>, PlanningError> {
    let source = format!("{{{fields}}}");
    let document = parse_query::<String>(&source)
        .map_err(|e| PlanningError::FederationSdl(format!("invalid field set {fields:?}: {e}")))?;
    let mut names = Vec::new();
    for definition in &document.definitions {
        if let graphql_parser::query::Definition::Operation(
            graphql_parser::query::OperationDefinition::SelectionSet(set),
        ) = definition
        {
            for selection in &set.items {
                if let Selection::Field(field) = selection {
                    names.push(field.name.clone());
                }
            }
        }
    }
    Ok(names)
}

/// Merges `base_sdl` with a service SDL and adds the federation types entity fetches are
/// validated against: `_Any`, `_Entity`, `_Service` and `Query._entities`/`Query._service`.
pub fn build_federation_schema(base_sdl: &str, service_sdl: &str) -> Result<String, PlanningError> {
    let metadata = FederationMetadata::parse(service_sdl)?;
    let mut sdl = format!("{base_sdl}\n{service_sdl}\nscalar _Any\ntype _Service {{ sdl: String }}\n");

    let entities: Vec<&str> = metadata.entity_types().collect();
    if entities.is_empty() {
        sdl.push_str("extend type Query { _service: _Service! }\n");
    } else {
        sdl.push_str(&format!("union _Entity = {}\n", entities.join(" | ")));
        sdl.push_str(
            "extend type Query { _entities(representations: [_Any!]!): [_Entity]! _service: _Service! }\n",
        );
    }
    Ok(sdl)
}
