//! Issue-observation hooks.
//!
//! A hook sees every command at the moment a module hands it to a child:
//! once before the child's `issue_command` (pre-issue) and once after
//! (post-issue). Hooks may annotate what they observe but never own the
//! request.

use tracing::info;

use crate::{Cycle, Request, StatSink};

/// When a hook fires relative to the wrapped issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreIssue,
    PostIssue,
}

/// An observer of command issue.
pub trait Hook {
    /// Hook name, used for stats prefixes and the `AddHook` directive.
    fn name(&self) -> &str;

    /// Called before the child sees the request.
    fn pre_issue(&mut self, _issuer: &str, _req: &Request, _now: Cycle) {}

    /// Called after the child accepted or rejected the request.
    fn post_issue(&mut self, _issuer: &str, _req: &Request, _now: Cycle, _accepted: bool) {}

    /// Contribute statistics under the hook's name.
    fn register_stats(&self, _sink: &mut StatSink) {}
}

/// Ordered hook chains, one per phase.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn Hook>>,
    pre: Vec<usize>,
    post: Vec<usize>,
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` for both phases, in registration order.
    pub fn add(&mut self, hook: Box<dyn Hook>) {
        let index = self.hooks.len();
        self.hooks.push(hook);
        self.pre.push(index);
        self.post.push(index);
    }

    /// Register `hook` for a single phase.
    pub fn add_for_phase(&mut self, hook: Box<dyn Hook>, phase: HookPhase) {
        let index = self.hooks.len();
        self.hooks.push(hook);
        match phase {
            HookPhase::PreIssue => self.pre.push(index),
            HookPhase::PostIssue => self.post.push(index),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn notify_pre_issue(&mut self, issuer: &str, req: &Request, now: Cycle) {
        for &index in &self.pre {
            self.hooks[index].pre_issue(issuer, req, now);
        }
    }

    pub fn notify_post_issue(&mut self, issuer: &str, req: &Request, now: Cycle, accepted: bool) {
        for &index in &self.post {
            self.hooks[index].post_issue(issuer, req, now, accepted);
        }
    }

    pub fn register_stats(&self, sink: &mut StatSink) {
        for hook in &self.hooks {
            sink.push_prefix(hook.name());
            hook.register_stats(sink);
            sink.pop_prefix();
        }
    }
}

/// Built-in hook: logs every issued command with its issuing module.
#[derive(Default)]
pub struct CommandTracerHook {
    commands_traced: u64,
}

impl CommandTracerHook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Hook for CommandTracerHook {
    fn name(&self) -> &str {
        "RequestTracer"
    }

    fn post_issue(&mut self, issuer: &str, req: &Request, now: Cycle, accepted: bool) {
        if !accepted {
            return;
        }
        self.commands_traced += 1;
        info!(
            target: "command_trace",
            cycle = now,
            module = issuer,
            op = ?req.op,
            address = format_args!("{:#x}", req.address.physical()),
            "issue"
        );
    }

    fn register_stats(&self, sink: &mut StatSink) {
        sink.counter("commands_traced", self.commands_traced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, ModulePath, OpType, Request};

    #[derive(Default)]
    struct CountingHook {
        pre: usize,
        post: usize,
    }

    impl Hook for CountingHook {
        fn name(&self) -> &str {
            "counting"
        }

        fn pre_issue(&mut self, _issuer: &str, _req: &Request, _now: Cycle) {
            self.pre += 1;
        }

        fn post_issue(&mut self, _issuer: &str, _req: &Request, _now: Cycle, _accepted: bool) {
            self.post += 1;
        }

        fn register_stats(&self, sink: &mut StatSink) {
            sink.counter("pre", self.pre as u64);
            sink.counter("post", self.post as u64);
        }
    }

    #[test]
    fn phases_fire_independently() {
        let mut hooks = HookRegistry::new();
        hooks.add_for_phase(Box::new(CountingHook::default()), HookPhase::PreIssue);

        let req = Request::new(OpType::Read, Address::new(0), ModulePath::Driver);
        hooks.notify_pre_issue("mc", &req, 1);
        hooks.notify_post_issue("mc", &req, 1, true);

        let mut sink = StatSink::new();
        hooks.register_stats(&mut sink);
        let entries = sink.into_entries();
        assert!(entries.iter().any(|e| e.name == "counting.pre"));
        let pre = entries
            .iter()
            .find(|e| e.name == "counting.pre")
            .expect("pre stat");
        assert_eq!(pre.value, crate::StatValue::Counter(1));
    }
}
