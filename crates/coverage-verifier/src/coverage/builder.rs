//! Incremental construction of a [`FileCoverage`].

use super::{Branch, BranchType, FileCoverage, Function, Range, SourceMap};

#[derive(Debug, Default, Clone, Copy)]
struct NextIds {
    s: u32,
    f: u32,
    b: u32,
}

/// Builds a record one statement, function and branch at a time, handing out
/// sequential ids and keeping counters in step with the maps.
#[derive(Debug, Clone)]
pub struct SourceCoverage {
    inner: FileCoverage,
    next: NextIds,
    report_logic: bool,
}

impl SourceCoverage {
    /// Start an empty record for `path`.
    #[must_use]
    pub fn new(path: impl Into<String>, report_logic: bool) -> Self {
        Self {
            inner: FileCoverage::empty(path, report_logic),
            next: NextIds::default(),
            report_logic,
        }
    }

    /// Register a statement and return its id.
    pub fn new_statement(&mut self, loc: Range) -> u32 {
        let id = self.next.s;
        self.inner.statement_map.insert(id, loc);
        self.inner.s.insert(id, 0);
        self.next.s += 1;
        id
    }

    /// Register a function and return its id.
    pub fn new_function(&mut self, name: Option<&str>, decl: Range, loc: Range) -> u32 {
        let id = self.next.f;
        let name = name.map_or_else(|| format!("(anonymous_{id})"), str::to_string);
        self.inner.fn_map.insert(
            id,
            Function {
                name,
                decl,
                loc,
                line: loc.start.line,
            },
        );
        self.inner.f.insert(id, 0);
        self.next.f += 1;
        id
    }

    /// Register a branch point with no arms yet and return its id.
    pub fn new_branch(&mut self, branch_type: BranchType, loc: Range) -> u32 {
        let id = self.next.b;
        self.inner.b.insert(id, Vec::new());
        self.inner.branch_map.insert(
            id,
            Branch {
                loc: Some(loc),
                branch_type,
                locations: Vec::new(),
                line: Some(loc.start.line),
            },
        );
        self.next.b += 1;
        self.maybe_new_branch_true(branch_type, id);
        id
    }

    /// Track truthiness for logical expressions when logic reporting is on.
    pub fn maybe_new_branch_true(&mut self, branch_type: BranchType, id: u32) {
        if !self.report_logic || branch_type != BranchType::BinaryExpr {
            return;
        }
        self.inner
            .b_t
            .get_or_insert_with(Default::default)
            .insert(id, Vec::new());
    }

    /// Append an arm to branch `id` and return the arm index.
    ///
    /// Returns `None` when the branch was never registered.
    pub fn add_branch_path(&mut self, id: u32, location: Range) -> Option<u32> {
        let meta = self.inner.branch_map.get_mut(&id)?;
        let counts = self.inner.b.get_mut(&id)?;
        meta.locations.push(location);
        counts.push(0);
        let arm = (counts.len() - 1) as u32;

        if let Some(counts_true) = self.inner.b_t.as_mut().and_then(|b_t| b_t.get_mut(&id)) {
            counts_true.push(0);
        }
        Some(arm)
    }

    /// Attach the input source map.
    pub fn set_input_source_map(&mut self, source_map: SourceMap) {
        self.inner.input_source_map = Some(source_map);
    }

    /// Drop branches that never received an arm.
    pub fn freeze(&mut self) {
        let empty: Vec<u32> = self
            .inner
            .branch_map
            .iter()
            .filter_map(|(id, branch)| branch.locations.is_empty().then_some(*id))
            .collect();
        for id in empty {
            self.inner.branch_map.remove(&id);
            self.inner.b.remove(&id);
            if let Some(b_t) = &mut self.inner.b_t {
                b_t.remove(&id);
            }
        }
    }

    /// Borrow the record built so far
    #[must_use]
    pub fn as_coverage(&self) -> &FileCoverage {
        &self.inner
    }

    /// Finish building
    #[must_use]
    pub fn into_coverage(mut self) -> FileCoverage {
        self.freeze();
        self.inner
    }
}
