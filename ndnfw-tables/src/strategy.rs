//! Strategy table and the contract of the strategy runtime.
//!
//! Forwarding strategies are programs loaded from an image by an external
//! runtime. The table owns every loaded program; FIB entries hold
//! reference-counted [`StrategyHandle`]s, and a program can only be
//! unloaded once no handle is left.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use ndnfw_core::{FaceId, Interest, NackReason};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::TableError;
use crate::pit::PitEntry;

pub type StrategyId = u32;

/// Why a strategy is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyEvent {
    /// A new or retransmitted Interest needs forwarding.
    RxInterest,
    /// Every upstream of the PIT entry returned a Nack.
    RxNack,
    /// A timer set by an earlier invocation fired.
    Timer,
}

/// Decision returned by a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyAction {
    Forward(Vec<FaceId>),
    Drop,
    Nack(NackReason),
}

/// Face status as seen by strategies.
pub trait FaceStatus: Sync {
    fn is_up(&self, face: FaceId) -> bool;
}

/// Everything a strategy may read during one invocation.
pub struct StrategyContext<'a> {
    pub event: StrategyEvent,
    pub interest: &'a Interest,
    /// Face the triggering packet arrived on.
    pub in_face: FaceId,
    pub pit: &'a PitEntry,
    pub nexthops: &'a [FaceId],
    faces: &'a dyn FaceStatus,
    timer: Option<Duration>,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        event: StrategyEvent,
        interest: &'a Interest,
        in_face: FaceId,
        pit: &'a PitEntry,
        nexthops: &'a [FaceId],
        faces: &'a dyn FaceStatus,
    ) -> Self {
        Self {
            event,
            interest,
            in_face,
            pit,
            nexthops,
            faces,
            timer: None,
        }
    }

    pub fn is_up(&self, face: FaceId) -> bool {
        self.faces.is_up(face)
    }

    /// Ask to be invoked again with [`StrategyEvent::Timer`] after `after`.
    /// A later call replaces an earlier one.
    pub fn set_timer(&mut self, after: Duration) {
        self.timer = Some(after);
    }

    pub fn timer(&self) -> Option<Duration> {
        self.timer
    }
}

/// A loaded strategy program.
pub trait StrategyProgram: Send + Sync {
    fn invoke(&self, ctx: &mut StrategyContext<'_>) -> StrategyAction;
}

/// Turns program images into executable programs.
pub trait StrategyRuntime: Send + Sync {
    fn load(&self, name: &str, image: &[u8]) -> Result<Box<dyn StrategyProgram>, TableError>;
}

struct StrategyCode {
    id: StrategyId,
    name: String,
    program: Box<dyn StrategyProgram>,
    refcnt: AtomicUsize,
}

/// Counted reference to a loaded strategy.
pub struct StrategyHandle {
    code: Arc<StrategyCode>,
}

impl StrategyHandle {
    fn new(code: Arc<StrategyCode>) -> Self {
        code.refcnt.fetch_add(1, Ordering::AcqRel);
        Self { code }
    }

    pub fn id(&self) -> StrategyId {
        self.code.id
    }

    pub fn name(&self) -> &str {
        &self.code.name
    }

    pub fn invoke(&self, ctx: &mut StrategyContext<'_>) -> StrategyAction {
        self.code.program.invoke(ctx)
    }
}

impl Clone for StrategyHandle {
    fn clone(&self) -> Self {
        Self::new(self.code.clone())
    }
}

impl Drop for StrategyHandle {
    fn drop(&mut self) {
        self.code.refcnt.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for StrategyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrategyHandle({}:{})", self.code.id, self.code.name)
    }
}

/// Listing entry for management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyInfo {
    pub id: StrategyId,
    pub name: String,
    pub refcnt: usize,
}

struct TableInner {
    by_id: HashMap<StrategyId, Arc<StrategyCode>>,
    last_id: StrategyId,
}

/// Global table of loaded strategies.
pub struct StrategyTable {
    runtime: Arc<dyn StrategyRuntime>,
    inner: RwLock<TableInner>,
}

impl StrategyTable {
    pub fn new(runtime: Arc<dyn StrategyRuntime>) -> Self {
        Self {
            runtime,
            inner: RwLock::new(TableInner {
                by_id: HashMap::new(),
                last_id: 0,
            }),
        }
    }

    /// Load a program. Names are unique within the table.
    pub fn load(&self, name: &str, image: &[u8]) -> Result<StrategyId, TableError> {
        let program = self.runtime.load(name, image)?;
        let mut inner = self.inner.write();
        if inner.by_id.values().any(|c| c.name == name) {
            return Err(TableError::StrategyLoad(format!("strategy {name} already loaded")));
        }
        inner.last_id += 1;
        let id = inner.last_id;
        inner.by_id.insert(
            id,
            Arc::new(StrategyCode {
                id,
                name: name.to_string(),
                program,
                refcnt: AtomicUsize::new(0),
            }),
        );
        info!("Loaded strategy {} as id {}", name, id);
        Ok(id)
    }

    /// Take a reference to a loaded strategy.
    pub fn get(&self, id: StrategyId) -> Option<StrategyHandle> {
        self.inner.read().by_id.get(&id).cloned().map(StrategyHandle::new)
    }

    pub fn find(&self, name: &str) -> Option<StrategyHandle> {
        self.inner
            .read()
            .by_id
            .values()
            .find(|c| c.name == name)
            .cloned()
            .map(StrategyHandle::new)
    }

    /// Remove a strategy that nothing references any more.
    pub fn unload(&self, id: StrategyId) -> Result<(), TableError> {
        let mut inner = self.inner.write();
        let code = inner.by_id.get(&id).ok_or(TableError::NotFound)?;
        let refcnt = code.refcnt.load(Ordering::Acquire);
        if refcnt > 0 {
            warn!("Refusing to unload strategy {} ({} references)", code.name, refcnt);
            return Err(TableError::StrategyInUse { id, refcnt });
        }
        if let Some(code) = inner.by_id.remove(&id) {
            info!("Unloaded strategy {} (id {})", code.name, id);
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<StrategyInfo> {
        let mut list: Vec<_> = self
            .inner
            .read()
            .by_id
            .values()
            .map(|c| StrategyInfo {
                id: c.id,
                name: c.name.clone(),
                refcnt: c.refcnt.load(Ordering::Acquire),
            })
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Forwards to every nexthop; accepts any image.
    pub(crate) struct EveryNexthop;

    impl StrategyProgram for EveryNexthop {
        fn invoke(&self, ctx: &mut StrategyContext<'_>) -> StrategyAction {
            StrategyAction::Forward(ctx.nexthops.to_vec())
        }
    }

    pub(crate) struct TestRuntime;

    impl StrategyRuntime for TestRuntime {
        fn load(&self, name: &str, image: &[u8]) -> Result<Box<dyn StrategyProgram>, TableError> {
            if image.is_empty() {
                return Err(TableError::StrategyLoad(format!("{name}: empty image")));
            }
            Ok(Box::new(EveryNexthop))
        }
    }

    pub(crate) fn test_table() -> StrategyTable {
        StrategyTable::new(Arc::new(TestRuntime))
    }

    #[test]
    fn test_refcount_follows_handles() {
        let table = test_table();
        let id = table.load("all", b"x").unwrap();
        let a = table.get(id).unwrap();
        let b = a.clone();
        assert_eq!(table.list()[0].refcnt, 2);
        assert!(matches!(table.unload(id), Err(TableError::StrategyInUse { refcnt: 2, .. })));
        drop(a);
        drop(b);
        table.unload(id).unwrap();
        assert!(table.get(id).is_none());
        assert_eq!(table.unload(id), Err(TableError::NotFound));
    }

    #[test]
    fn test_load_errors() {
        let table = test_table();
        assert!(matches!(table.load("bad", b""), Err(TableError::StrategyLoad(_))));
        table.load("dup", b"x").unwrap();
        assert!(matches!(table.load("dup", b"x"), Err(TableError::StrategyLoad(_))));
        assert_eq!(table.find("dup").unwrap().name(), "dup");
        assert!(table.find("none").is_none());
    }
}
