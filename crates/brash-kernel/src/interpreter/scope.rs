//! Variable scope management.
//!
//! Scopes provide:
//! - Nested variable frames (pushed per function call)
//! - The function table (procs and typed funcs)
//! - `$?`, `PIPESTATUS` and `_process_sub_status`
//! - Positional parameters and shell options

use std::collections::HashMap;

use brash_types::{StatusArray, Value};

use crate::ast::FuncDef;

/// Variable scope with nested frames.
///
/// Variables are looked up from innermost to outermost frame.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Stack of variable frames. Last element is the innermost scope.
    frames: Vec<HashMap<String, Value>>,
    functions: HashMap<String, FuncDef>,
    last_status: i32,
    pipe_status: Vec<i32>,
    process_sub_status: StatusArray,
    /// Script or function name ($0).
    script_name: String,
    /// Positional arguments ($1-$9, $@, $#).
    positional: Vec<String>,
    /// `set -x`
    xtrace: bool,
}

impl Scope {
    /// Create a new scope with one empty frame.
    pub fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
            functions: HashMap::new(),
            last_status: 0,
            pipe_status: Vec::new(),
            process_sub_status: StatusArray::default(),
            script_name: String::new(),
            positional: Vec::new(),
            xtrace: false,
        }
    }

    /// Push a new frame (entering a function call).
    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    /// Pop the innermost frame.
    ///
    /// Panics if attempting to pop the last frame.
    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        } else {
            panic!("cannot pop the root scope frame");
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Set a variable in the innermost frame.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    /// Update the innermost frame that already binds `name`, or create the
    /// binding in the root frame.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let frame = match self.frames.iter().rposition(|f| f.contains_key(&name)) {
            Some(idx) => &mut self.frames[idx],
            None => &mut self.frames[0],
        };
        frame.insert(name, value);
    }

    /// Get a variable by name, searching from innermost to outermost frame.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.frames.iter_mut().rev().find_map(|frame| frame.remove(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn define_function(&mut self, def: FuncDef) {
        self.functions.insert(def.name.clone(), def);
    }

    /// Look up a proc or typed func. The body is shared, so cloning is cheap.
    pub fn function(&self, name: &str) -> Option<FuncDef> {
        self.functions.get(name).cloned()
    }

    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    pub fn set_last_status(&mut self, status: i32) {
        self.last_status = status;
    }

    pub fn pipe_status(&self) -> &[i32] {
        &self.pipe_status
    }

    pub fn set_pipe_status(&mut self, statuses: Vec<i32>) {
        self.pipe_status = statuses;
    }

    /// Statuses of the process substitutions of the last simple command.
    pub fn process_sub_status(&self) -> &StatusArray {
        &self.process_sub_status
    }

    pub fn set_process_sub_status(&mut self, statuses: StatusArray) {
        self.process_sub_status = statuses;
    }

    /// Set the positional parameters ($0, $1-$9, $@, $#).
    pub fn set_positional(&mut self, script_name: impl Into<String>, args: Vec<String>) {
        self.script_name = script_name.into();
        self.positional = args;
    }

    /// Save current positional parameters for later restoration.
    pub fn save_positional(&self) -> (String, Vec<String>) {
        (self.script_name.clone(), self.positional.clone())
    }

    /// `$0` is the script name, `$1`… are arguments.
    pub fn get_positional(&self, n: usize) -> Option<&str> {
        if n == 0 {
            Some(self.script_name.as_str()).filter(|s| !s.is_empty())
        } else {
            self.positional.get(n - 1).map(|s| s.as_str())
        }
    }

    pub fn arg_count(&self) -> usize {
        self.positional.len()
    }

    pub fn xtrace_enabled(&self) -> bool {
        self.xtrace
    }

    pub fn set_xtrace(&mut self, enabled: bool) {
        self.xtrace = enabled;
    }

    /// Resolve `$NAME`, including the special parameters.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        match name {
            "?" => Some(Value::Int(i64::from(self.last_status))),
            "#" => Some(Value::Int(self.arg_count() as i64)),
            "@" => Some(Value::Str(self.positional.join(" "))),
            "PIPESTATUS" => Some(Value::List(
                self.pipe_status.iter().map(|&s| Value::Int(i64::from(s))).collect(),
            )),
            "_process_sub_status" => Some(Value::List(
                self.process_sub_status
                    .codes
                    .iter()
                    .map(|&s| Value::Int(i64::from(s)))
                    .collect(),
            )),
            _ => match name.parse::<usize>() {
                Ok(n) => self.get_positional(n).map(|s| Value::Str(s.to_string())),
                Err(_) => self.get(name).cloned(),
            },
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}
