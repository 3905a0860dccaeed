/// Instance Module - placed copies of one meshlet set
///
/// Purely data-oriented:
/// - instance_data.rs: GPU-ready instance records and scatter settings
/// - instance_operations.rs: pure functions building instance lists

pub mod instance_data;
pub mod instance_operations;

pub use instance_data::*;
pub use instance_operations::*;
