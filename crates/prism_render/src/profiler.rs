//! Stage markers.
//!
//! Profilers only observe: every stage brackets its work with paired
//! begin/end events, and nothing in the pipeline reads profiler state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageType {
    Frame,
    PrimaryPass,
    Shading,
    ShadowTrace,
    ShadowReduction,
    ShadowSearch,
    ShadowBlur,
    Raytrace,
    Combine,
    Traversal,
}

/// Finer step within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubEvent {
    None,
    EmissiveInit,
    NoShadowLighting,
    ShadowedLighting,
    BlurRadius,
    HorizontalPass,
    VerticalPass,
    FirstBounce,
    NthBounce,
    HitDistanceFilter,
}

/// Key identifying a profiled section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileEvent {
    pub stage: StageType,
    pub light_index: Option<usize>,
    pub sub_event: SubEvent,
}

impl ProfileEvent {
    pub fn new(stage: StageType) -> Self {
        Self {
            stage,
            light_index: None,
            sub_event: SubEvent::None,
        }
    }

    pub fn light(mut self, light_index: usize) -> Self {
        self.light_index = Some(light_index);
        self
    }

    pub fn sub(mut self, sub_event: SubEvent) -> Self {
        self.sub_event = sub_event;
        self
    }
}

/// Receiver of paired stage markers.
pub trait Profiler {
    fn begin(&self, event: ProfileEvent);
    fn end(&self, event: ProfileEvent);
}

impl<P: Profiler + ?Sized> Profiler for Rc<P> {
    fn begin(&self, event: ProfileEvent) {
        (**self).begin(event);
    }

    fn end(&self, event: ProfileEvent) {
        (**self).end(event);
    }
}

/// Ends its event when dropped.
pub struct ProfileScope<'a> {
    profiler: &'a dyn Profiler,
    event: ProfileEvent,
}

impl<'a> ProfileScope<'a> {
    pub fn new(profiler: &'a dyn Profiler, event: ProfileEvent) -> Self {
        profiler.begin(event);
        Self { profiler, event }
    }
}

impl Drop for ProfileScope<'_> {
    fn drop(&mut self) {
        self.profiler.end(self.event);
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullProfiler;

impl Profiler for NullProfiler {
    fn begin(&self, _event: ProfileEvent) {}
    fn end(&self, _event: ProfileEvent) {}
}

/// Times events and logs them at trace level.
#[derive(Debug, Default)]
pub struct LogProfiler {
    open: RefCell<Vec<(ProfileEvent, Instant)>>,
    totals: RefCell<HashMap<ProfileEvent, (u32, Duration)>>,
}

impl LogProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated (count, time) per event, slowest first.
    pub fn summary(&self) -> Vec<(ProfileEvent, u32, Duration)> {
        let mut rows: Vec<_> = self
            .totals
            .borrow()
            .iter()
            .map(|(event, (count, time))| (*event, *count, *time))
            .collect();
        rows.sort_by(|a, b| b.2.cmp(&a.2));
        rows
    }
}

impl Profiler for LogProfiler {
    fn begin(&self, event: ProfileEvent) {
        self.open.borrow_mut().push((event, Instant::now()));
    }

    fn end(&self, event: ProfileEvent) {
        let mut open = self.open.borrow_mut();
        let Some(position) = open.iter().rposition(|(e, _)| *e == event) else {
            log::warn!("Profiler end without begin: {event:?}");
            return;
        };
        let (_, started) = open.remove(position);
        let elapsed = started.elapsed();
        log::trace!(
            "{:?} {:?} light={:?}: {:.3} ms",
            event.stage,
            event.sub_event,
            event.light_index,
            elapsed.as_secs_f64() * 1000.0
        );

        let mut totals = self.totals.borrow_mut();
        let entry = totals.entry(event).or_insert((0, Duration::ZERO));
        entry.0 += 1;
        entry.1 += elapsed;
    }
}

/// Keeps the raw event sequence (`true` = begin).
#[derive(Debug, Default)]
pub struct RecordingProfiler {
    events: RefCell<Vec<(bool, ProfileEvent)>>,
}

impl RecordingProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(bool, ProfileEvent)> {
        self.events.borrow().clone()
    }

    /// Whether every begin has a matching end in stack order.
    pub fn is_balanced(&self) -> bool {
        let mut stack = Vec::new();
        for (begin, event) in self.events.borrow().iter() {
            if *begin {
                stack.push(*event);
            } else if stack.pop() != Some(*event) {
                return false;
            }
        }
        stack.is_empty()
    }
}

impl Profiler for RecordingProfiler {
    fn begin(&self, event: ProfileEvent) {
        self.events.borrow_mut().push((true, event));
    }

    fn end(&self, event: ProfileEvent) {
        self.events.borrow_mut().push((false, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_pairs_events() {
        let profiler = RecordingProfiler::new();
        {
            let _frame = ProfileScope::new(&profiler, ProfileEvent::new(StageType::Frame));
            let _shadow = ProfileScope::new(
                &profiler,
                ProfileEvent::new(StageType::ShadowBlur).light(2).sub(SubEvent::VerticalPass),
            );
        }

        let events = profiler.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1].1.light_index, Some(2));
        assert!(profiler.is_balanced());
    }

    #[test]
    fn test_log_profiler_accumulates() {
        let profiler = LogProfiler::new();
        for _ in 0..3 {
            let _scope = ProfileScope::new(&profiler, ProfileEvent::new(StageType::Combine));
        }
        let summary = profiler.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].1, 3);
    }
}
