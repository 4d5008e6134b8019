//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod alert;
pub mod auth_token;
pub mod budget;
pub mod device;
pub mod device_telemetry;
pub mod production_event;
pub mod production_order;
pub mod project;
pub mod user;

// Re-export specific types to avoid conflicts
pub use alert::{Column as AlertColumn, Entity as Alert, Model as AlertModel};
pub use auth_token::{Column as AuthTokenColumn, Entity as AuthToken, Model as AuthTokenModel};
pub use budget::{Column as BudgetColumn, Entity as Budget, Model as BudgetModel};
pub use device::{Column as DeviceColumn, Entity as Device, Model as DeviceModel};
pub use device_telemetry::{
    Column as DeviceTelemetryColumn, Entity as DeviceTelemetry, Model as DeviceTelemetryModel,
};
pub use production_event::{
    Column as ProductionEventColumn, Entity as ProductionEvent, Model as ProductionEventModel,
};
pub use production_order::{
    Column as ProductionOrderColumn, Entity as ProductionOrder, Model as ProductionOrderModel,
};
pub use project::{Column as ProjectColumn, Entity as Project, Model as ProjectModel};
pub use user::{Column as UserColumn, Entity as User, Model as UserModel};
