use graphql_parser::query::Type;
use graphql_parser::schema::{self, Definition, TypeDefinition, TypeExtension};
use std::collections::HashMap;

use crate::error::PlanningError;
use crate::variables::JsonValueType;

pub type SchemaType = Type<'static, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Enum,
    Scalar,
    InputObject,
}

#[derive(Clone, Debug)]
pub struct InputValueInfo {
    pub name: String,
    pub ty: SchemaType,
}

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: String,
    pub arguments: Vec<InputValueInfo>,
    pub ty: SchemaType,
}

#[derive(Clone, Debug)]
pub struct TypeInfo {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldInfo>,
}

impl TypeInfo {
    fn new(name: &str, kind: TypeKind) -> Self {
        TypeInfo {
            name: name.to_string(),
            kind,
            fields: Vec::new(),
        }
    }
}

/// Lookup tables over a schema document: types, fields, arguments and root operation types.
/// Type extensions are merged into their base definitions.
#[derive(Clone, Debug)]
pub struct SchemaIndex {
    types: HashMap<String, TypeInfo>,
    query_type: String,
    mutation_type: String,
    subscription_type: String,
}

impl SchemaIndex {
    pub fn parse(sdl: &str) -> Result<Self, PlanningError> {
        let document = schema::parse_schema::<String>(sdl)
            .map_err(|e| PlanningError::ParseSchema(e.to_string()))?;

        let mut index = SchemaIndex {
            types: HashMap::new(),
            query_type: "Query".to_string(),
            mutation_type: "Mutation".to_string(),
            subscription_type: "Subscription".to_string(),
        };

        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(schema_def) => {
                    if let Some(query) = &schema_def.query {
                        index.query_type = query.clone();
                    }
                    if let Some(mutation) = &schema_def.mutation {
                        index.mutation_type = mutation.clone();
                    }
                    if let Some(subscription) = &schema_def.subscription {
                        index.subscription_type = subscription.clone();
                    }
                }
                Definition::TypeDefinition(typedef) => index.add_type_definition(typedef),
                Definition::TypeExtension(extension) => index.add_type_extension(extension),
                Definition::DirectiveDefinition(_) => {}
            }
        }

        Ok(index)
    }

    fn entry(&mut self, name: &str, kind: TypeKind) -> &mut TypeInfo {
        self.types
            .entry(name.to_string())
            .or_insert_with(|| TypeInfo::new(name, kind))
    }

    fn add_type_definition(&mut self, typedef: &TypeDefinition<'_, String>) {
        match typedef {
            TypeDefinition::Object(obj) => {
                let info = self.entry(&obj.name, TypeKind::Object);
                info.kind = TypeKind::Object;
                push_fields(info, &obj.fields);
            }
            TypeDefinition::Interface(iface) => {
                let info = self.entry(&iface.name, TypeKind::Interface);
                info.kind = TypeKind::Interface;
                push_fields(info, &iface.fields);
            }
            TypeDefinition::Union(union_type) => {
                self.entry(&union_type.name, TypeKind::Union).kind = TypeKind::Union;
            }
            TypeDefinition::Enum(enum_type) => {
                self.entry(&enum_type.name, TypeKind::Enum).kind = TypeKind::Enum;
            }
            TypeDefinition::Scalar(scalar) => {
                self.entry(&scalar.name, TypeKind::Scalar).kind = TypeKind::Scalar;
            }
            TypeDefinition::InputObject(input) => {
                self.entry(&input.name, TypeKind::InputObject).kind = TypeKind::InputObject;
            }
        }
    }

    // Extensions may precede their base definition, the kind is fixed up once the base shows up.
    fn add_type_extension(&mut self, extension: &TypeExtension<'_, String>) {
        match extension {
            TypeExtension::Object(obj) => {
                push_fields(self.entry(&obj.name, TypeKind::Object), &obj.fields);
            }
            TypeExtension::Interface(iface) => {
                push_fields(self.entry(&iface.name, TypeKind::Interface), &iface.fields);
            }
            TypeExtension::Union(union_type) => {
                self.entry(&union_type.name, TypeKind::Union);
            }
            TypeExtension::Enum(enum_type) => {
                self.entry(&enum_type.name, TypeKind::Enum);
            }
            TypeExtension::Scalar(scalar) => {
                self.entry(&scalar.name, TypeKind::Scalar);
            }
            TypeExtension::InputObject(input) => {
                self.entry(&input.name, TypeKind::InputObject);
            }
        }
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldInfo> {
        self.types
            .get(type_name)?
            .fields
            .iter()
            .find(|f| f.name == field_name)
    }

    /// Named type of a field's return type. `__typename` resolves on every composite type.
    pub fn field_type_name(&self, type_name: &str, field_name: &str) -> Option<String> {
        if field_name == "__typename" {
            return Some("String".to_string());
        }
        self.field(type_name, field_name)
            .map(|f| named_type(&f.ty).to_string())
    }

    pub fn argument(&self, type_name: &str, field_name: &str, arg: &str) -> Option<&InputValueInfo> {
        self.field(type_name, field_name)?
            .arguments
            .iter()
            .find(|a| a.name == arg)
    }

    pub fn is_abstract(&self, type_name: &str) -> bool {
        matches!(
            self.types.get(type_name).map(|t| t.kind),
            Some(TypeKind::Interface) | Some(TypeKind::Union)
        )
    }

    /// JSON shape values of `ty` render as.
    pub fn json_value_type(&self, ty: &Type<'_, String>) -> JsonValueType {
        match ty {
            Type::NonNullType(inner) => self.json_value_type(inner),
            Type::ListType(_) => JsonValueType::Array,
            Type::NamedType(name) => match name.as_str() {
                "String" | "ID" => JsonValueType::String,
                "Int" | "Float" => JsonValueType::Number,
                "Boolean" => JsonValueType::Boolean,
                other => match self.types.get(other).map(|t| t.kind) {
                    Some(TypeKind::Enum) => JsonValueType::String,
                    Some(TypeKind::InputObject) | Some(TypeKind::Object) => JsonValueType::Object,
                    _ => JsonValueType::Any,
                },
            },
        }
    }

    pub fn root_type_name(&self, kind: OperationKind) -> &str {
        match kind {
            OperationKind::Query => &self.query_type,
            OperationKind::Mutation => &self.mutation_type,
            OperationKind::Subscription => &self.subscription_type,
        }
    }

    /// Drops the current query root and promotes `root_type` in its place.
    pub fn replace_query_type(&mut self, root_type: &str) {
        if self.query_type == root_type {
            return;
        }
        let previous = std::mem::replace(&mut self.query_type, root_type.to_string());
        self.types.remove(&previous);
    }
}

// Merged documents may declare the same field twice, the first declaration wins.
fn push_fields(info: &mut TypeInfo, fields: &[schema::Field<'_, String>]) {
    for field in fields {
        if !info.fields.iter().any(|f| f.name == field.name) {
            info.fields.push(field_info(field));
        }
    }
}

fn field_info(field: &schema::Field<'_, String>) -> FieldInfo {
    FieldInfo {
        name: field.name.clone(),
        arguments: field.arguments.iter().map(input_value_info).collect(),
        ty: to_static_type(&field.field_type),
    }
}

fn input_value_info(value: &schema::InputValue<'_, String>) -> InputValueInfo {
    InputValueInfo {
        name: value.name.clone(),
        ty: to_static_type(&value.value_type),
    }
}

pub fn to_static_type(ty: &Type<'_, String>) -> SchemaType {
    match ty {
        Type::NamedType(name) => Type::NamedType(name.clone()),
        Type::ListType(inner) => Type::ListType(Box::new(to_static_type(inner))),
        Type::NonNullType(inner) => Type::NonNullType(Box::new(to_static_type(inner))),
    }
}

pub fn named_type<'t>(ty: &'t Type<'_, String>) -> &'t str {
    match ty {
        Type::NamedType(name) => name,
        Type::ListType(inner) | Type::NonNullType(inner) => named_type(inner),
    }
}

pub fn rename_named_type(ty: &SchemaType, rename_to: &str) -> SchemaType {
    match ty {
        Type::NamedType(_) => Type::NamedType(rename_to.to_string()),
        Type::ListType(inner) => Type::ListType(Box::new(rename_named_type(inner, rename_to))),
        Type::NonNullType(inner) => {
            Type::NonNullType(Box::new(rename_named_type(inner, rename_to)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        schema { query: Query }
        type Query { me: User }
        type User { id: ID! name(format: String): String }
        extend type User { reviews: [Review] }
        type Review { body: String! }
        union SearchResult = User | Review
    "#;

    #[test]
    fn merges_extensions_and_reads_roots() {
        let index = SchemaIndex::parse(SDL).unwrap();
        assert_eq!(index.root_type_name(OperationKind::Query), "Query");
        assert_eq!(index.field_type_name("User", "reviews").as_deref(), Some("Review"));
        assert_eq!(index.field_type_name("Review", "__typename").as_deref(), Some("String"));
        assert!(index.is_abstract("SearchResult"));
        assert_eq!(
            index.argument("User", "name", "format").map(|a| a.ty.to_string()),
            Some("String".to_string())
        );
    }

    #[test]
    fn replace_query_type_promotes_root() {
        let mut index = SchemaIndex::parse(SDL).unwrap();
        index.replace_query_type("User");
        assert_eq!(index.root_type_name(OperationKind::Query), "User");
        assert!(!index.has_type("Query"));
        assert!(index.field("User", "reviews").is_some());
    }
}
