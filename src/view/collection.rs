use std::sync::Arc;

use parking_lot::Mutex;

use super::controller::{ArrayController, ContentEvent, ObjectController, ObjectEvent};
use super::View;
use crate::events::Subscription;
use crate::record::Record;
use crate::store::ArrayChange;

type ItemRenderer = Arc<dyn Fn(&Record) -> String + Send + Sync>;

struct Child {
    record: Record,
    line: String,
    renders: usize,
}

impl Child {
    fn new(record: Record, render: &ItemRenderer) -> Self {
        let line = render(&record);
        Self {
            record,
            line,
            renders: 1,
        }
    }

    fn refresh(&mut self, render: &ItemRenderer) {
        self.line = render(&self.record);
        self.renders += 1;
    }
}

/// Renders one child per element of an [`ArrayController`].
///
/// Children are patched in place from content events: an insert renders
/// only the new element, a change re-renders only that element.
pub struct CollectionView {
    children: Arc<Mutex<Vec<Child>>>,
    _binding: Subscription<ContentEvent>,
}

impl CollectionView {
    pub fn new<F>(controller: &ArrayController, render: F) -> Self
    where
        F: Fn(&Record) -> String + Send + Sync + 'static,
    {
        let render: ItemRenderer = Arc::new(render);
        let children = Arc::new(Mutex::new(build(controller, &render)));

        let source = controller.clone();
        let sink = children.clone();
        let binding = controller.subscribe(move |event| {
            let mut children = sink.lock();
            match event {
                ContentEvent::Reset => *children = build(&source, &render),
                ContentEvent::Item(ArrayChange::Inserted { index, record }) => {
                    let index = (*index).min(children.len());
                    children.insert(index, Child::new(record.clone(), &render));
                }
                ContentEvent::Item(ArrayChange::Removed { index, record }) => {
                    if children.get(*index).is_some_and(|c| c.record.ptr_eq(record)) {
                        children.remove(*index);
                    } else {
                        children.retain(|c| !c.record.ptr_eq(record));
                    }
                }
                ContentEvent::Item(ArrayChange::Changed { record, .. }) => {
                    if let Some(child) = children.iter_mut().find(|c| c.record.ptr_eq(record)) {
                        child.refresh(&render);
                    }
                }
            }
        });

        Self {
            children,
            _binding: binding,
        }
    }

    pub fn len(&self) -> usize {
        self.children.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records currently shown, in display order.
    pub fn records(&self) -> Vec<Record> {
        self.children.lock().iter().map(|c| c.record.clone()).collect()
    }

    /// How many times each child has been rendered.
    pub fn render_counts(&self) -> Vec<usize> {
        self.children.lock().iter().map(|c| c.renders).collect()
    }
}

fn build(controller: &ArrayController, render: &ItemRenderer) -> Vec<Child> {
    controller
        .records()
        .into_iter()
        .map(|r| Child::new(r, render))
        .collect()
}

impl View for CollectionView {
    fn render(&self) -> Vec<String> {
        self.children.lock().iter().map(|c| c.line.clone()).collect()
    }
}

/// Renders the attributes of an [`ObjectController`]'s record, one
/// `name: value` line each, in schema order.
pub struct RecordView {
    controller: ObjectController,
    cached: Arc<Mutex<Option<Vec<String>>>>,
    _binding: Subscription<ObjectEvent>,
}

impl RecordView {
    pub fn new(controller: &ObjectController) -> Self {
        let cached = Arc::new(Mutex::new(None));
        let sink = cached.clone();
        let binding = controller.subscribe(move |_| {
            *sink.lock() = None;
        });
        Self {
            controller: controller.clone(),
            cached,
            _binding: binding,
        }
    }
}

impl View for RecordView {
    fn render(&self) -> Vec<String> {
        let mut cached = self.cached.lock();
        if let Some(lines) = cached.as_ref() {
            return lines.clone();
        }
        let lines = match self.controller.content() {
            Some(record) if !record.is_deleted() => record
                .schema()
                .attributes()
                .iter()
                .map(|attr| {
                    let value = record
                        .get(&attr.name)
                        .map(|v| match v {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .unwrap_or_default();
                    format!("{}: {}", attr.name, value)
                })
                .collect(),
            _ => Vec::new(),
        };
        *cached = Some(lines.clone());
        lines
    }
}
