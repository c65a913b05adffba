//! The value model — notes, compressible sequences, and the reference
//! handles the runtime stacks and operates on.

pub mod data_ref;
pub mod note;
pub mod sequence;

pub use data_ref::{new_seq, DataRef, DataType, SeqRef};
pub use note::{Attr, Note};
pub use sequence::Sequence;
