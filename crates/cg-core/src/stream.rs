use cg_config::EngineOptions;
use cg_grammar::{Grammar, SetId, TagId, TagStore};
use orion_error::ErrorOwe;

use crate::cohort::{Cohort, CohortId};
use crate::dep;
use crate::engine::Engine;
use crate::error::CoreResult;
use crate::matcher::Matcher;
use crate::reading::Reading;
use crate::window::{SingleWindow, WindowStore};

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Receives each window after rule application, before it is retired into
/// the lookbehind buffer.
pub trait StreamSink {
    fn emit_window(&mut self, out: WindowOutput<'_>) -> CoreResult<()>;
}

/// Read-only view of one finished window handed to the sink.
pub struct WindowOutput<'a> {
    pub window: &'a SingleWindow,
    pub store: &'a WindowStore,
    pub tags: &'a TagStore,
}

impl<'a> WindowOutput<'a> {
    pub fn cohorts(&self) -> impl Iterator<Item = &'a Cohort> + '_ {
        self.window
            .cohorts
            .iter()
            .filter_map(|id| self.store.cohort(*id))
    }

    /// Render in the vertical stream format: a wordform line, then one
    /// indented line per reading. The start marker cohort and the boundary
    /// tags are omitted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for c in self.cohorts() {
            let wf = self.tags.get(c.wordform);
            if wf.text == ">>>" {
                continue;
            }
            out.push_str(&wf.text);
            out.push('\n');
            for r in &c.readings {
                out.push('\t');
                let mut first = true;
                for t in &r.tags_list {
                    let tag = self.tags.get(*t);
                    if tag.flags.boundary {
                        continue;
                    }
                    if !first {
                        out.push(' ');
                    }
                    out.push_str(&tag.text);
                    first = false;
                }
                out.push('\n');
            }
            if !c.text.is_empty() {
                out.push_str(&c.text);
                out.push('\n');
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// CohortBuilder
// ---------------------------------------------------------------------------

/// Input-side description of one cohort. The wordform is the raw surface
/// form, without stream quoting.
#[derive(Debug, Clone, Default)]
pub struct CohortBuilder {
    wordform: String,
    readings: Vec<Vec<String>>,
    text: String,
}

impl CohortBuilder {
    pub fn new(wordform: impl Into<String>) -> Self {
        Self {
            wordform: wordform.into(),
            ..Self::default()
        }
    }

    pub fn reading<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.readings
            .push(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Verbatim text following the cohort in the stream.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

// ---------------------------------------------------------------------------
// StreamController
// ---------------------------------------------------------------------------

/// Drives the whole pipeline: buffers cohorts into windows, decides window
/// boundaries, keeps `window_span` windows of lookahead, runs the engine on
/// each window and hands the result to the sink.
pub struct StreamController<S> {
    grammar: Grammar,
    tags: TagStore,
    opts: EngineOptions,
    store: WindowStore,
    sink: S,
    open: Option<SingleWindow>,
    pub windows_emitted: u64,
}

impl<S: StreamSink> StreamController<S> {
    /// Compile-check the grammar and options. Failures here are fatal
    /// configuration errors; no input may be pushed afterwards.
    pub fn new(
        mut grammar: Grammar,
        tags: TagStore,
        opts: EngineOptions,
        sink: S,
    ) -> CoreResult<Self> {
        opts.validate().owe_conf()?;
        grammar.reindex(&tags);
        grammar.verify(&tags).owe_conf()?;
        let store = WindowStore::new(opts.prev_retention as usize);
        Ok(Self {
            grammar,
            tags,
            opts,
            store,
            sink,
            open: None,
            windows_emitted: 0,
        })
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    /// Append one cohort to the open window, closing it when a delimiter or
    /// a size limit says so, and run every window that has enough lookahead.
    pub fn push_cohort(&mut self, b: CohortBuilder) -> CoreResult<()> {
        let mut sw = match self.open.take() {
            Some(w) => w,
            None => self.fresh_window(),
        };

        let wf = self.tags.intern(&format!("\"<{}>\"", b.wordform));
        let id = self.store.alloc_cohort(sw.number, wf);
        if let Some(c) = self.store.cohort_mut(id) {
            c.local = sw.len() as u32;
            c.text = b.text;
            for reading in &b.readings {
                let ids: Vec<TagId> = reading.iter().map(|t| self.tags.intern(t)).collect();
                c.append_reading(Reading::from_tags(&self.tags, ids));
            }
            if b.readings.is_empty() {
                // Unanalyzed token: a bare baseform reading keeps it visible
                // to rules and the output side.
                let base = self.tags.intern(&format!("\"{}\"", b.wordform));
                c.append_reading(Reading::from_tags(&self.tags, [base]));
            }
        }
        sw.cohorts.push(id);

        let count = sw.len() as u32;
        if self.matches_set(id, self.grammar.delimiters) {
            self.close_window(sw);
        } else if count >= self.opts.hard_limit {
            log::warn!("window {} force-closed at the hard limit", sw.number);
            self.close_window(sw);
        } else if count >= self.opts.soft_limit
            && self.matches_set(id, self.grammar.soft_delimiters)
        {
            self.close_window(sw);
        } else if count == self.opts.soft_limit
            && let Some(cut) = self.find_soft_cut(&sw)
        {
            // Over the soft limit with no delimiter in sight: split at the
            // most recent buffered soft delimiter instead.
            let tail = sw.cohorts.split_off(cut + 1);
            self.close_window(sw);
            let mut nw = self.fresh_window();
            nw.cohorts.extend(tail);
            self.store.renumber(&nw);
            self.open = Some(nw);
        } else {
            self.open = Some(sw);
        }
        self.pump(false)
    }

    /// Close the open window and drain everything that is still buffered.
    pub fn flush(&mut self) -> CoreResult<()> {
        if let Some(sw) = self.open.take() {
            self.close_window(sw);
        }
        self.pump(true)
    }

    /// Flush and hand the sink back.
    pub fn finish(mut self) -> CoreResult<S> {
        self.flush()?;
        Ok(self.sink)
    }

    // -- internals ----------------------------------------------------------

    fn fresh_window(&mut self) -> SingleWindow {
        let mut sw = self.store.new_window();
        let marker = self.store.alloc_cohort(sw.number, self.grammar.tag_begin);
        let boundary = Reading::from_tags(&self.tags, [self.grammar.tag_begin]);
        if let Some(c) = self.store.cohort_mut(marker) {
            c.readings.push(boundary);
        }
        sw.cohorts.push(marker);
        sw
    }

    fn matches_set(&self, id: CohortId, set: Option<SetId>) -> bool {
        let (Some(set), Some(c)) = (set, self.store.cohort(id)) else {
            return false;
        };
        let mut m = Matcher::new(&self.grammar, &self.tags);
        m.match_cohort(c, set)
    }

    /// Rightmost cohort within the lookback horizon matching the soft
    /// delimiter set, excluding the freshly pushed one.
    fn find_soft_cut(&self, sw: &SingleWindow) -> Option<usize> {
        self.grammar.soft_delimiters?;
        let horizon = sw.len().saturating_sub(self.opts.soft_lookback as usize);
        (horizon..sw.len().saturating_sub(1))
            .rev()
            .find(|i| self.matches_set(sw.cohorts[*i], self.grammar.soft_delimiters))
    }

    fn close_window(&mut self, mut sw: SingleWindow) {
        // A window holding only the start marker carries no content.
        if sw.len() <= 1 {
            for id in sw.cohorts {
                self.store.free_cohort(id);
            }
            return;
        }
        if let Some(last) = sw.cohorts.last().copied()
            && let Some(c) = self.store.cohort_mut(last)
        {
            for r in &mut c.readings {
                r.add_tag(&self.tags, self.grammar.tag_end);
            }
        }
        self.store.renumber(&sw);
        sw.closed = true;
        self.store.next.push_back(sw);
    }

    fn pump(&mut self, force: bool) -> CoreResult<()> {
        loop {
            let ready = self.store.next.iter().filter(|w| w.closed).count();
            let enough = if force {
                ready >= 1
            } else {
                ready as u32 > self.opts.window_span
            };
            if !enough {
                return Ok(());
            }
            let Some(mut sw) = self.store.next.pop_front() else {
                return Ok(());
            };
            dep::reflow(&mut self.store, &sw);
            let engine = Engine::new(&self.grammar, &self.opts);
            engine.run_window(&mut self.tags, &mut self.store, &mut sw)?;
            self.sink.emit_window(WindowOutput {
                window: &sw,
                store: &self.store,
                tags: &self.tags,
            })?;
            self.windows_emitted += 1;
            self.store.retire(sw);
        }
    }
}
