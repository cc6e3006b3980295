pub mod reader;

pub use reader::{InputError, InputReader, ReadOutcome};
