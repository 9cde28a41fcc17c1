//! Minimal diagnostics: plain stderr logging plus a debug-only
//! "log once per address class" helper used by the bus when it sees
//! reads/writes hitting unmapped or not-yet-implemented registers.

#[allow(unused)]
pub(crate) fn info(msg: impl std::fmt::Display) {
    eprintln!("gbcore: {msg}");
}

#[allow(unused)]
pub(crate) fn warn(msg: impl std::fmt::Display) {
    eprintln!("gbcore: warning: {msg}");
}

#[cfg(debug_assertions)]
pub(crate) mod once {
    use std::cell::RefCell;
    use std::collections::HashSet;

    thread_local! {
        static SEEN: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
    }

    /// Logs `msg` the first time a given address `class` is seen in this
    /// thread; silent on every later call with the same class.
    pub(crate) fn log(class: &'static str, msg: impl std::fmt::Display) {
        let first = SEEN.with(|seen| seen.borrow_mut().insert(class));
        if first {
            eprintln!("gbcore: unmapped/unimplemented {class}: {msg}");
        }
    }
}

#[cfg(not(debug_assertions))]
pub(crate) mod once {
    pub(crate) fn log(_class: &'static str, _msg: impl std::fmt::Display) {}
}
