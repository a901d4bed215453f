//! Named failure injection points for exercising I/O error paths.
//!
//! A site is armed for the current thread with [`enable`] or [`arm`], or for
//! the whole process by listing it in `KEEL_FAILPOINTS` (comma separated).
//! The environment is read once, the first time any site is checked.

use std::cell::RefCell;
use std::collections::HashSet;
use std::io;
use std::sync::OnceLock;

use crate::error::{DbError, DbResult};

/// Before a page's bytes reach the table file.
pub const HEAP_WRITE_PAGE: &str = "heap.write_page";

/// After the log is forced for a flush, before the page write.
pub const FLUSH_AFTER_FORCE: &str = "pool.flush_after_force";

thread_local! {
    static THREAD_SITES: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

fn process_sites() -> &'static HashSet<String> {
    static SITES: OnceLock<HashSet<String>> = OnceLock::new();
    SITES.get_or_init(|| {
        std::env::var("KEEL_FAILPOINTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|site| !site.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    })
}

pub fn enable(name: &str) {
    THREAD_SITES.with(|sites| {
        sites.borrow_mut().insert(name.to_string());
    });
}

pub fn disable(name: &str) {
    THREAD_SITES.with(|sites| {
        sites.borrow_mut().remove(name);
    });
}

/// Disarms every site armed on this thread. Sites from `KEEL_FAILPOINTS`
/// stay armed.
pub fn clear() {
    THREAD_SITES.with(|sites| sites.borrow_mut().clear());
}

/// Arms `name` on this thread until the returned guard is dropped.
pub fn arm(name: &'static str) -> Armed {
    enable(name);
    Armed { name }
}

#[must_use = "the failpoint is disarmed when the guard is dropped"]
pub struct Armed {
    name: &'static str,
}

impl Drop for Armed {
    fn drop(&mut self) {
        disable(self.name);
    }
}

pub fn is_enabled(name: &str) -> bool {
    THREAD_SITES.with(|sites| sites.borrow().contains(name)) || process_sites().contains(name)
}

/// Fails with an I/O error when `name` is armed.
pub fn maybe_fail(name: &str) -> DbResult<()> {
    if !is_enabled(name) {
        return Ok(());
    }
    log::debug!("failpoint {name} triggered");
    Err(DbError::Io(io::Error::other(format!("failpoint triggered: {name}"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_local_arming() {
        assert!(maybe_fail("unit.test").is_ok());
        enable("unit.test");
        assert!(matches!(maybe_fail("unit.test"), Err(DbError::Io(_))));

        let other_thread = std::thread::spawn(|| is_enabled("unit.test")).join().unwrap();
        assert!(!other_thread);

        disable("unit.test");
        assert!(maybe_fail("unit.test").is_ok());
    }

    #[test]
    fn test_guard_disarms_on_drop() {
        {
            let _armed = arm(HEAP_WRITE_PAGE);
            assert!(is_enabled(HEAP_WRITE_PAGE));
            assert!(!is_enabled(FLUSH_AFTER_FORCE));
        }
        assert!(!is_enabled(HEAP_WRITE_PAGE));
    }
}
