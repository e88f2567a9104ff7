//! Test doubles for the command-execution seam.
//!
//! `MockRunner` records every invocation and answers from a scripted
//! handler, so subsystem procedures can be exercised without touching
//! the host. Only compiled for tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::sys::exec::{ActionResult, CommandRunner};

type Handler = Box<dyn Fn(&str, &[&str], Option<&str>) -> ActionResult + Send + Sync>;

pub struct MockRunner {
    calls: Mutex<Vec<String>>,
    handler: Handler,
}

impl MockRunner {
    /// Everything succeeds with empty output.
    pub fn permissive() -> Self {
        Self::with_handler(|_, _, _| ActionResult::ok(""))
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str, &[&str], Option<&str>) -> ActionResult + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// A runner where only `test -f <path>` probes for the given paths
    /// succeed; every other command succeeds with empty output.
    pub fn with_present_files(paths: &[&str]) -> Self {
        let present: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        Self::with_handler(move |program, args, _| {
            if program == "test" && args.first() == Some(&"-f") {
                let path = args.get(1).copied().unwrap_or("");
                if present.iter().any(|p| p == path) {
                    ActionResult::ok("")
                } else {
                    ActionResult::fail("", "test exited with exit status: 1")
                }
            } else {
                ActionResult::ok("")
            }
        })
    }

    /// Emulates the host crontab store: `crontab -l` reads it,
    /// `crontab -` replaces it from stdin. `None` means no crontab yet.
    pub fn with_crontab(initial: Option<&str>) -> Self {
        let store: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(initial.map(String::from)));
        Self::with_handler(move |program, args, stdin| {
            if program != "crontab" {
                return ActionResult::ok("");
            }
            match args {
                ["-l"] => match store.lock().unwrap().clone() {
                    Some(content) => ActionResult::ok(content),
                    None => ActionResult::fail("no crontab for root", "crontab exited with exit status: 1"),
                },
                ["-"] => {
                    *store.lock().unwrap() = Some(stdin.unwrap_or_default().to_string());
                    ActionResult::ok("")
                }
                _ => ActionResult::ok(""),
            }
        })
    }

    /// Rendered command lines, in invocation order.
    pub fn invocations(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, program: &str, args: &[&str]) {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().unwrap().push(line);
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, program: &str, args: &[&str]) -> ActionResult {
        self.record(program, args);
        (self.handler)(program, args, None)
    }

    async fn run_with_stdin(&self, program: &str, args: &[&str], input: &str) -> ActionResult {
        self.record(program, args);
        (self.handler)(program, args, Some(input))
    }
}
