use std::env;

use super::Probe;
use crate::job::Event;

/// Polls one environment variable of this process.
pub struct EnvProbe {
    var: String,
}

impl EnvProbe {
    /// Watch `var`.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Probe for EnvProbe {
    type State = Option<String>;

    fn name(&self) -> &'static str { "env" }

    fn observe(&mut self) -> Option<String> {
        env::var_os(&self.var).map(|v| v.to_string_lossy().into_owned())
    }

    /// Appearing, disappearing and changing value are each one event.
    fn diff(&self, prev: &Option<String>, curr: &Option<String>) -> Vec<Event> {
        if prev == curr {
            return Vec::new();
        }
        vec![Event::EnvChanged { name: self.var.clone(), previous: prev.clone(), current: curr.clone() }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn every_transition_is_one_event() {
        let p = EnvProbe::new("MY_VAR");
        assert!(p.diff(&None, &None).is_empty());
        assert!(p.diff(&some("a"), &some("a")).is_empty());
        assert_eq!(p.diff(&None, &some("a")).len(), 1);
        assert_eq!(p.diff(&some("a"), &None).len(), 1);
        assert_eq!(
            p.diff(&some("a"), &some("b")),
            vec![Event::EnvChanged { name: "MY_VAR".into(), previous: some("a"), current: some("b") }]
        );
    }

    #[test]
    fn reads_process_environment() {
        let name = "CRONWATCH_ENV_PROBE_TEST";
        let mut p = EnvProbe::new(name);
        env::remove_var(name);
        assert_eq!(p.observe(), None);
        env::set_var(name, "on");
        assert_eq!(p.observe(), some("on"));
        env::remove_var(name);
    }
}
