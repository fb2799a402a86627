//! Frame request compiler.
//!
//! [`FrameCompiler::handle`] takes a [`RawRequest`] through validation, the UID lifecycle,
//! catalog resolution, assembly, packing and reconciliation, and returns a [`FrameResponse`]
//! carrying either the configuration document or a user-facing failure message.

pub mod assemble;
pub mod compiler;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod request;

pub use assemble::{declared_tools, FrameSetAssembler};
pub use compiler::{FrameCompiler, FrameResponse, STATUS_REJECTED, STATUS_UNAVAILABLE};
pub use config::CompilerConfig;
pub use error::{
    classify, summarize_packer_errors, BuildError, PackerErrorClass, ValidationError, EMPTY_BUILD_MESSAGE,
    MISSING_INPUT_MESSAGE,
};
pub use reconcile::reconcile;
pub use request::{Embedded, RawFrameSet, RawRequest, UpdateEntry};
