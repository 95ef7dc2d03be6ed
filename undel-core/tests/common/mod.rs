//! Agricultural fixture schema shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use undel_core::{
    Database, DeletionUndoManager, EntityStore, EntityType, FieldDescriptor, FieldKind,
    MemoryDatabase, Record, RelationshipDescriptor, TypeRegistry, UndoConfig,
};

pub type Manager = DeletionUndoManager<MemoryDatabase>;

pub const TYPES: [&str; 11] = [
    "Crop",
    "CropPest",
    "CultivationPlan",
    "Farm",
    "Field",
    "FieldCultivation",
    "Pest",
    "PestControlMethod",
    "PestTemperatureProfile",
    "Task",
    "Observation",
];

pub fn registry() -> Arc<TypeRegistry> {
    let registry = TypeRegistry::new()
        .with_type(
            EntityType::new("Pest")
                .with_field(FieldDescriptor::text("name").required().unique())
                .with_field(FieldDescriptor::text("name_scientific"))
                .with_field(FieldDescriptor::new("is_reference", FieldKind::Boolean))
                .with_relationship(RelationshipDescriptor::has_one(
                    "pest_temperature_profile",
                    "PestTemperatureProfile",
                    "pest_id",
                ))
                .with_relationship(RelationshipDescriptor::has_many(
                    "pest_control_methods",
                    "PestControlMethod",
                    "pest_id",
                ))
                .with_relationship(RelationshipDescriptor::has_many(
                    "crop_pests",
                    "CropPest",
                    "pest_id",
                ))
                .with_relationship(
                    RelationshipDescriptor::has_many("observations", "Observation", "pest_id")
                        .nullify(),
                ),
        )
        .with_type(
            EntityType::new("PestTemperatureProfile")
                .with_field(FieldDescriptor::reference("pest_id", "Pest"))
                .with_field(FieldDescriptor::new("base_temperature", FieldKind::Float))
                .with_field(FieldDescriptor::new("max_temperature", FieldKind::Float)),
        )
        .with_type(
            EntityType::new("PestControlMethod")
                .with_field(FieldDescriptor::reference("pest_id", "Pest"))
                .with_field(FieldDescriptor::text("method_type"))
                .with_field(FieldDescriptor::text("name").required()),
        )
        .with_type(
            EntityType::new("Crop")
                .with_field(FieldDescriptor::text("name").required())
                .with_relationship(RelationshipDescriptor::has_many(
                    "crop_pests",
                    "CropPest",
                    "crop_id",
                )),
        )
        .with_type(
            EntityType::new("CropPest")
                .with_field(FieldDescriptor::reference("crop_id", "Crop"))
                .with_field(FieldDescriptor::reference("pest_id", "Pest")),
        )
        .with_type(
            EntityType::new("Observation")
                .with_field(FieldDescriptor::reference("pest_id", "Pest"))
                .with_field(FieldDescriptor::new("observed_on", FieldKind::Date)),
        )
        .with_type(
            EntityType::new("Farm")
                .with_field(FieldDescriptor::text("name").required().unique())
                .with_field(FieldDescriptor::reference("primary_field_id", "Field"))
                .with_relationship(RelationshipDescriptor::has_many("fields", "Field", "farm_id"))
                .with_relationship(RelationshipDescriptor::has_many(
                    "cultivation_plans",
                    "CultivationPlan",
                    "farm_id",
                )),
        )
        .with_type(
            EntityType::new("Field")
                .with_field(FieldDescriptor::reference("farm_id", "Farm"))
                .with_field(FieldDescriptor::text("name"))
                .with_field(FieldDescriptor::new("area", FieldKind::Decimal)),
        )
        .with_type(
            EntityType::new("CultivationPlan")
                .with_field(FieldDescriptor::reference("farm_id", "Farm"))
                .with_field(FieldDescriptor::reference("field_id", "Field"))
                .with_field(FieldDescriptor::text("name"))
                .with_relationship(RelationshipDescriptor::has_many(
                    "field_cultivations",
                    "FieldCultivation",
                    "cultivation_plan_id",
                )),
        )
        .with_type(
            EntityType::new("FieldCultivation")
                .with_field(FieldDescriptor::reference("cultivation_plan_id", "CultivationPlan"))
                .with_field(FieldDescriptor::reference("field_id", "Field"))
                .with_field(FieldDescriptor::new("starts_on", FieldKind::Date)),
        )
        .with_type(
            EntityType::new("Task")
                .with_field(FieldDescriptor::text("name"))
                .with_field(FieldDescriptor::reference("parent_id", "Task"))
                .with_relationship(RelationshipDescriptor::has_many("subtasks", "Task", "parent_id")),
        );

    registry.validate().expect("fixture registry is consistent");
    Arc::new(registry)
}

pub fn manager() -> Manager {
    manager_with(UndoConfig::default())
}

pub fn manager_with(config: UndoConfig) -> Manager {
    let registry = registry();
    DeletionUndoManager::with_config(
        Arc::clone(&registry),
        MemoryDatabase::new(registry),
        config,
    )
}

pub fn save(manager: &Manager, record: Record) -> Record {
    manager
        .database()
        .transaction(|tx| tx.save(record))
        .expect("fixture row saves")
}

pub fn find(manager: &Manager, entity_type: &str, id: i64) -> Option<Record> {
    manager
        .database()
        .transaction(|tx| tx.find(entity_type, id))
        .expect("lookup succeeds")
}

pub fn count(manager: &Manager, entity_type: &str) -> usize {
    manager.database().state().expect("state readable").count(entity_type)
}

/// Every row of every fixture type, in a stable order
pub fn all_rows(manager: &Manager) -> Vec<Record> {
    let state = manager.database().state().expect("state readable");
    TYPES.iter().flat_map(|t| state.rows(t)).collect()
}

/// A pest with one temperature profile, two control methods and a crop link
pub fn seed_pest(manager: &Manager) -> Record {
    let pest = save(
        manager,
        Record::new("Pest")
            .with("name", "Aphid")
            .with("name_scientific", "Aphidoidea")
            .with("is_reference", false),
    );
    let pest_id = pest.id.expect("saved pest has id");

    save(
        manager,
        Record::new("PestTemperatureProfile")
            .with("pest_id", pest_id)
            .with("base_temperature", 10.0)
            .with("max_temperature", 30.0),
    );
    for (method_type, name) in [("chemical", "A"), ("biological", "B")] {
        save(
            manager,
            Record::new("PestControlMethod")
                .with("pest_id", pest_id)
                .with("method_type", method_type)
                .with("name", name),
        );
    }

    let crop = save(manager, Record::new("Crop").with("name", "Wheat"));
    save(
        manager,
        Record::new("CropPest")
            .with("crop_id", crop.id.expect("saved crop has id"))
            .with("pest_id", pest_id),
    );
    pest
}

/// A farm with two fields, a plan on the second field and a cultivation on
/// the first; the farm's `primary_field_id` points at its first field.
pub fn seed_farm(manager: &Manager) -> Record {
    let farm = save(manager, Record::new("Farm").with("name", "North Farm"));
    let farm_id = farm.id.expect("saved farm has id");

    let area = undel_core::ScalarValue::decimal("12.50").expect("valid decimal");
    let first = save(
        manager,
        Record::new("Field")
            .with("farm_id", farm_id)
            .with("name", "Upper")
            .with("area", area),
    );
    let second = save(
        manager,
        Record::new("Field").with("farm_id", farm_id).with("name", "Lower"),
    );

    let plan = save(
        manager,
        Record::new("CultivationPlan")
            .with("farm_id", farm_id)
            .with("field_id", second.id.expect("saved field has id"))
            .with("name", "2026 rotation"),
    );
    save(
        manager,
        Record::new("FieldCultivation")
            .with("cultivation_plan_id", plan.id.expect("saved plan has id"))
            .with("field_id", first.id.expect("saved field has id"))
            .with(
                "starts_on",
                chrono::NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date"),
            ),
    );

    save(
        manager,
        farm.with("primary_field_id", first.id.expect("saved field has id")),
    )
}
