#![allow(dead_code)]

pub mod mock;
pub mod sequence;

pub use mock::{Call, MockClient, MockError, MockHandle};
pub use sequence::Sequence;
