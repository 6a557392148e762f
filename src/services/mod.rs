//! Interfaces to the deployed environment and to the services patched by
//! hotswap actions.
//!
//! Both sides are traits so classification can run offline against a
//! recorded [`EnvironmentSnapshot`] and tests can substitute mocks.

mod apply;
mod environment;
mod snapshot;

pub use apply::{
    AppSyncFunction, FunctionCodeUpdate, FunctionConfiguration, FunctionConfigurationUpdate,
    FunctionState, HotswapServices, LastUpdateStatus, ProjectUpdate, SchemaCreationStatus,
    SchemaStatus, ServiceStatus, ServiceUpdate,
};
pub use environment::{EnvironmentQuery, Export, ExportPage, StackResource};
pub use snapshot::{EXPORT_PAGE_SIZE, EnvironmentSnapshot};

#[cfg(test)]
pub(crate) use apply::MockHotswapServices;
#[cfg(test)]
pub(crate) use environment::MockEnvironmentQuery;
