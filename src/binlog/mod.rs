pub mod event;
pub mod stream;

pub use event::{ChangeEvent, Row, SourcedEvent, SqlValue};
pub use stream::BinlogSource;
