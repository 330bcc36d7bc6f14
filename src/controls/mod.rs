pub mod registry;
pub mod spec;
pub mod value;

pub use registry::{
    resolve, ControlEntry, ControlMeta, ControlRegistry, ControlTable, ControlUpdate, Meta,
    RegistryGuard, UpdateOutcome,
};
pub use spec::{default_table, ControlSpec, Widget, FRAME_DURATION_LIMITS, QUALITY};
pub use value::{
    coerce, CoercionError, ControlKind, ControlValue, RequestedValue, MAXIMUM_SENTINEL,
};
