//! `modbridge` Core: value model, function markers, export classification,
//! serializability checks, and the invocation outcome codec.

pub mod exports;
pub mod marker;
pub mod outcome;
pub mod protocol;
pub mod serializable;
pub mod traits;
pub mod types;

pub use exports::{
    exports_any_function, has_any_named_function_export, named_function_exports, to_transport,
    ClassifyError, ExportedValue, ModuleExports, NamedFunctionExport,
};
pub use marker::{function_marker, is_function_placeholder, FUNCTION_KEY};
pub use outcome::{decode, DecodedOutcome, ExecutionOutcome, Invocation, InvocationError};
pub use protocol::{CodecError, Request, Response};
pub use serializable::{
    deep_strict_equal, is_serializable, MsgPackRoundTrip, RoundTripCheck, MAX_DATA_DEPTH,
    MAX_EXPANDED_NODES,
};
pub use traits::{ExportedFunction, ThrownValue};
pub use types::{FunctionRef, SharedValue, Value};
