use serde::Serialize;

use crate::model::Pagination;

/// Loading phase of a feed source.
///
/// `Loading` drives the full-list spinner, `LoadingMore` the incremental
/// one at the bottom of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Loading,
    Loaded,
    LoadingMore,
    Error,
}

impl Phase {
    pub fn is_busy(self) -> bool {
        matches!(self, Phase::Loading | Phase::LoadingMore)
    }
}

/// Where the last `has_more` answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HasMoreBasis {
    /// Nothing fetched yet; optimistic `true`.
    Assumed,
    /// Computed from server pagination metadata.
    Server,
    /// Guessed from `received >= page_size` because the server sent no
    /// metadata. A full last page reports `has_more` once too often.
    Heuristic,
}

/// Per-source pagination state machine.
///
/// `Idle -> Loading -> Loaded | Error`, then `Loaded -> LoadingMore ->
/// Loaded | Error`. At most one page is outstanding at a time.
#[derive(Debug, Clone)]
pub struct PaginationCursor {
    /// Last page merged into the cache; 0 before the first success.
    loaded_page: u32,
    page_size: u32,
    has_more: bool,
    basis: HasMoreBasis,
    phase: Phase,
    /// Page currently being fetched.
    in_flight: Option<u32>,
}

impl PaginationCursor {
    pub fn new(page_size: u32) -> Self {
        Self {
            loaded_page: 0,
            page_size: page_size.max(1),
            has_more: true,
            basis: HasMoreBasis::Assumed,
            phase: Phase::Idle,
            in_flight: None,
        }
    }

    /// Current page: the one in flight, else the last one loaded (min 1).
    pub fn page(&self) -> u32 {
        self.in_flight.unwrap_or(self.loaded_page).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn has_more_basis(&self) -> HasMoreBasis {
        self.basis
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_loaded(&self) -> bool {
        self.loaded_page > 0
    }

    /// Back to `page=1, has_more=true, phase=Idle`.
    pub fn reset(&mut self) {
        *self = Self::new(self.page_size);
    }

    /// Start a page-1 fetch. Resets the cursor first.
    pub fn begin_initial(&mut self) -> u32 {
        self.reset();
        self.phase = Phase::Loading;
        self.in_flight = Some(1);
        1
    }

    /// Start the next page fetch.
    ///
    /// Returns `None` (a no-op, not an error) while a fetch is outstanding
    /// or when the source is exhausted. Before any successful load this
    /// starts the initial fetch instead.
    pub fn begin_next(&mut self) -> Option<u32> {
        if self.phase.is_busy() || self.in_flight.is_some() {
            return None;
        }
        if !self.has_loaded() {
            return Some(self.begin_initial());
        }
        if !self.has_more {
            return None;
        }
        let next = self.loaded_page + 1;
        self.phase = Phase::LoadingMore;
        self.in_flight = Some(next);
        Some(next)
    }

    /// Record a successful fetch of `page`.
    pub fn complete(&mut self, page: u32, received: usize, pagination: Option<&Pagination>) {
        if self.in_flight != Some(page) {
            tracing::debug!(
                page,
                in_flight = ?self.in_flight,
                "Ignoring completion for page not in flight"
            );
            return;
        }
        self.in_flight = None;
        self.loaded_page = page;
        self.phase = Phase::Loaded;

        match pagination.and_then(|p| self.has_more_from_server(p)) {
            Some(more) => {
                self.has_more = more;
                self.basis = HasMoreBasis::Server;
            }
            None => {
                self.has_more = received >= self.page_size as usize;
                self.basis = HasMoreBasis::Heuristic;
                tracing::debug!(
                    page,
                    received,
                    page_size = self.page_size,
                    has_more = self.has_more,
                    "No pagination metadata, guessing has_more from page length"
                );
            }
        }
    }

    /// Record a failed fetch of `page`. Already-loaded pages stay loaded.
    pub fn fail(&mut self, page: u32) {
        if self.in_flight != Some(page) {
            return;
        }
        self.in_flight = None;
        self.phase = Phase::Error;
    }

    /// Release the in-flight slot without recording an outcome (the fetch
    /// was rejected or superseded before it produced a result).
    pub fn abandon(&mut self, page: u32) {
        if self.in_flight != Some(page) {
            return;
        }
        self.in_flight = None;
        self.phase = if self.has_loaded() {
            Phase::Loaded
        } else {
            Phase::Idle
        };
    }

    /// Abandon whatever page is in flight (source switched away).
    pub fn abandon_in_flight(&mut self) {
        if let Some(page) = self.in_flight {
            self.abandon(page);
        }
    }

    fn has_more_from_server(&self, p: &Pagination) -> Option<bool> {
        if let Some(last) = p.last_page {
            return Some(p.current_page < last);
        }
        p.total
            .map(|total| u64::from(p.current_page) * u64::from(self.page_size) < total)
    }
}
