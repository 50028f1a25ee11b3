//! Multi-state render dispatch
//!
//! Data-driven screens render exactly one of four states per evaluation:
//! a skeleton while loading, an error panel, an empty placeholder, or the
//! data itself. [`select_branch`] is the pure selection function;
//! [`Suspense`] packages it with up to four caller-supplied render
//! closures and invokes exactly one.
//!
//! The selection priority is fixed: loading wins over error, error over
//! empty, empty over data. A caller that supplies no closure for the
//! selected branch renders nothing; that is not an error.

use crate::FetchSnapshot;

/// The four mutually exclusive render states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspenseBranch {
    Skeleton,
    Error,
    Empty,
    Data,
}

/// Select the branch to render for a given fetch outcome. Total over all
/// eight input combinations.
pub fn select_branch(loading: bool, has_error: bool, has_data: bool) -> SuspenseBranch {
    if loading {
        SuspenseBranch::Skeleton
    } else if has_error {
        SuspenseBranch::Error
    } else if !has_data {
        SuspenseBranch::Empty
    } else {
        SuspenseBranch::Data
    }
}

type RenderFn<'a, R> = Box<dyn FnOnce() -> R + 'a>;
type RenderErrorFn<'a, R> = Box<dyn FnOnce(&str) -> R + 'a>;
type RenderDataFn<'a, T, R> = Box<dyn FnOnce(&T) -> R + 'a>;

/// Declarative one-of-four renderer.
///
/// The caller registers a closure per branch it cares about; [`Suspense::render`]
/// picks the branch per [`select_branch`] and invokes at most one closure.
///
/// ```
/// use dgcache::Suspense;
///
/// let pets = vec!["Rex", "Momo"];
/// let out = Suspense::new()
///     .skeleton(|| "loading...".to_owned())
///     .error(|msg| format!("failed: {msg}"))
///     .empty(|| "no pets yet".to_owned())
///     .data(|pets: &Vec<&str>| format!("{} pets", pets.len()))
///     .render(false, None, Some(&pets));
/// assert_eq!(out.as_deref(), Some("2 pets"));
/// ```
pub struct Suspense<'a, T, R> {
    skeleton: Option<RenderFn<'a, R>>,
    error: Option<RenderErrorFn<'a, R>>,
    empty: Option<RenderFn<'a, R>>,
    data: Option<RenderDataFn<'a, T, R>>,
}

impl<'a, T, R> Default for Suspense<'a, T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T, R> Suspense<'a, T, R> {
    pub fn new() -> Self {
        Self {
            skeleton: None,
            error: None,
            empty: None,
            data: None,
        }
    }

    /// Rendered while a fetch is outstanding.
    pub fn skeleton(mut self, f: impl FnOnce() -> R + 'a) -> Self {
        self.skeleton = Some(Box::new(f));
        self
    }

    /// Rendered when the fetch failed; receives the producer's message.
    pub fn error(mut self, f: impl FnOnce(&str) -> R + 'a) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Rendered when the fetch settled without data to show.
    pub fn empty(mut self, f: impl FnOnce() -> R + 'a) -> Self {
        self.empty = Some(Box::new(f));
        self
    }

    /// Rendered when data is available; receives the resolved value.
    pub fn data(mut self, f: impl FnOnce(&T) -> R + 'a) -> Self {
        self.data = Some(Box::new(f));
        self
    }

    /// Select and render exactly one branch. Returns `None` when the caller
    /// supplied no closure for the selected branch.
    ///
    /// `data` drives both branch selection (`has_data`) and the value passed
    /// to the data closure; a caller that wants an empty collection to
    /// render the Empty branch passes `None`.
    pub fn render(self, loading: bool, error: Option<&str>, data: Option<&T>) -> Option<R> {
        match select_branch(loading, error.is_some(), data.is_some()) {
            SuspenseBranch::Skeleton => self.skeleton.map(|f| f()),
            SuspenseBranch::Error => match (self.error, error) {
                (Some(f), Some(msg)) => Some(f(msg)),
                _ => None,
            },
            SuspenseBranch::Empty => self.empty.map(|f| f()),
            SuspenseBranch::Data => match (self.data, data) {
                (Some(f), Some(value)) => Some(f(value)),
                _ => None,
            },
        }
    }

    /// Render straight from a fetch handle snapshot.
    pub fn render_snapshot(self, snapshot: &FetchSnapshot<T>) -> Option<R> {
        self.render(
            snapshot.loading,
            snapshot.error.as_deref(),
            snapshot.data.as_deref(),
        )
    }
}
