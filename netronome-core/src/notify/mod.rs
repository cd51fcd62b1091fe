//! Event -> rule -> channel fan-out with threshold evaluation and
//! delivery-history logging.

pub mod dispatcher;

pub use dispatcher::Dispatcher;
