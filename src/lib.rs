pub mod batch;
pub mod common;
pub mod decoder;
pub mod error;
pub mod fixture;
pub mod gas;
pub mod interpreter;
pub mod journal;
pub mod memory;
pub mod message;
pub mod opcodes;
pub mod stack;
pub mod staging;
pub mod tracer;

pub use crate::{
    batch::{run_batch, BatchOptions},
    error::ErrorCode,
    fixture::Fixture,
    interpreter::{Interpreter, Outcome},
    journal::{BaseAccount, Journal, World},
    message::{CallKind, Message},
    tracer::Trace,
};
