//! API classification
//!
//! Distinguishes project code from kernel/common APIs: a callee counts as an
//! API when the module has no definition for it, when it is an intrinsic or
//! declaration, or when its body lives in a header file. A small deny-list
//! keeps logging helpers out.

use crate::shared::models::ir::{FuncId, ModuleIr};
use once_cell::sync::Lazy;
use std::collections::BTreeSet;

static NOT_API: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    BTreeSet::from([
        "__dynamic_dev_dbg",
        "_printk",
        "_dev_err",
        "llvm.objectsize.i64.p0i8",
    ])
});

/// Calls whose return value never counts as a semantic input.
pub const OBJECTSIZE_INTRINSIC: &str = "llvm.objectsize.i64.p0i8";

pub struct ApiClassifier<'a> {
    module: &'a ModuleIr,
    /// Functions containing this substring belong to the analysis tooling
    ignored_substr: String,
}

impl<'a> ApiClassifier<'a> {
    pub fn new(module: &'a ModuleIr, ignored_substr: impl Into<String>) -> Self {
        Self {
            module,
            ignored_substr: ignored_substr.into(),
        }
    }

    pub fn is_api_name(&self, name: &str) -> bool {
        if NOT_API.contains(name) {
            return false;
        }
        match self.module.function_by_name(name) {
            None => true,
            Some(func) => self.is_api(func),
        }
    }

    pub fn is_api(&self, func: FuncId) -> bool {
        let f = self.module.func(func);
        if NOT_API.contains(f.name.as_str()) {
            return false;
        }
        if !self.ignored_substr.is_empty() && f.name.contains(&self.ignored_substr) {
            return false;
        }
        if f.is_intrinsic || f.is_declaration {
            return true;
        }
        f.source_file.ends_with(".h")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations_and_headers_are_apis() {
        let mut m = ModuleIr::new();
        let decl = m.add_declaration("kmalloc");
        let header = m.add_function("mutex_lock", "include/linux/mutex.h");
        let body = m.add_function("before.patch.probe", "driver/x.c");

        let api = ApiClassifier::new(&m, "");
        assert!(api.is_api(decl));
        assert!(api.is_api(header));
        assert!(!api.is_api(body));
        assert!(api.is_api_name("missing_entirely"));
    }

    #[test]
    fn test_deny_list_is_not_api() {
        let m = ModuleIr::new();
        let api = ApiClassifier::new(&m, "");
        assert!(!api.is_api_name("_printk"));
        assert!(!api.is_api_name("llvm.objectsize.i64.p0i8"));
    }
}
