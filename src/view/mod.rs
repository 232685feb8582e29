//! Controllers and views bound to live store content.
//!
//! Controllers hold a content reference and republish its changes. Views
//! subscribe to a controller and keep their rendered output current, one
//! child per element for collections. Producing markup is left to the
//! caller: views render to plain lines through a renderer closure.

mod collection;
mod controller;
mod outlet;

pub use collection::{CollectionView, RecordView};
pub use controller::{ArrayController, ContentEvent, ObjectController, ObjectEvent};
pub use outlet::Outlet;

/// Anything the [`Outlet`] can display.
pub trait View: Send + Sync {
    fn render(&self) -> Vec<String>;
}
