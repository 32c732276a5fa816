//! Shared fixtures for unit tests

use crate::schema::{EntityType, ItemKind, PropertyDef, PropertyKind, Registry, ScalarKind};

fn text(name: &str) -> PropertyDef {
    PropertyDef::new(name, PropertyKind::Scalar(ScalarKind::Text))
}

/// Project <- Task -> User, with a list, a map, a blob and two back-references
pub(crate) fn sample_registry() -> Registry {
    let mut registry = Registry::default();
    registry
        .define_types(vec![
            EntityType::new(
                "Project",
                true,
                vec![
                    text("title"),
                    PropertyDef::new("tasks", PropertyKind::BackReference { target: "Task".into(), via: "project".into() }),
                ],
            ),
            EntityType::new(
                "Task",
                true,
                vec![
                    text("title"),
                    PropertyDef::new("project", PropertyKind::Reference { target: "Project".into() }),
                    PropertyDef::new("tags", PropertyKind::List { item: ItemKind::Scalar(ScalarKind::Text) }),
                    PropertyDef::new("meta", PropertyKind::Map { item: ItemKind::Scalar(ScalarKind::Integer) }),
                    PropertyDef::new("attachment", PropertyKind::Blob),
                    PropertyDef::new("watchers", PropertyKind::List { item: ItemKind::Entity("User".into()) }),
                    PropertyDef::new("done", PropertyKind::Scalar(ScalarKind::Boolean)),
                ],
            ),
            EntityType::new(
                "User",
                true,
                vec![
                    text("name"),
                    PropertyDef::new("watching", PropertyKind::BackReference { target: "Task".into(), via: "watchers".into() }),
                ],
            ),
        ])
        .expect("sample schema is valid");
    registry
}
