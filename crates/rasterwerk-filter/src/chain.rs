// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image filter chain — negotiates which configured filters apply to an
// image, then moves lines through the accepted ones with at most one line in
// flight between neighbours.
//
// Link states:
//
//   Ready    no buffered input; the filter is ticked with an empty push
//   Pending  holds a line handed over by its predecessor
//   Locked   its last output sits in the successor's input
//   Stalled  holds an output line its successor could not take yet
//
// Locked and Stalled remember whether to resume as Ready or Pending.

use std::ops::Range;

use rasterwerk_core::config::PipelineConfig;
use rasterwerk_core::error::{RasterwerkError, Result};
use tracing::{debug, info, instrument, warn};

use crate::filter::{
    Filter, FilterController, FilterInstance, FilteredImageArgs, ImageContext, LineAccumulator,
};
use crate::filters::expose;
use crate::transaction::Transaction;

/// State a locked or stalled link returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    Ready,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// The filter is not available. Permanent.
    Dead,
    /// Not part of the current image.
    Invalid,
    Ready,
    Pending,
    Locked { resume: Resume },
    Stalled { resume: Resume },
}

impl From<Resume> for LinkState {
    fn from(resume: Resume) -> Self {
        match resume {
            Resume::Ready => Self::Ready,
            Resume::Pending => Self::Pending,
        }
    }
}

struct ChainLink {
    filter: Filter,
    state: LinkState,
    instance: Option<Box<dyn FilterInstance>>,
    /// Line handed over by the predecessor. Bound while Pending.
    input: Transaction,
    /// Last pulled output, waiting for the successor.
    outbox: Vec<u8>,
    previous: Option<usize>,
    next: Option<usize>,
}

impl ChainLink {
    fn new(filter: Filter) -> Self {
        let state = if filter.is_dead() {
            LinkState::Dead
        } else {
            LinkState::Invalid
        };
        Self {
            filter,
            state,
            instance: None,
            input: Transaction::external(),
            outbox: Vec::new(),
            previous: None,
            next: None,
        }
    }

    fn reset(&mut self) {
        self.instance = None;
        if self.state != LinkState::Dead {
            self.state = LinkState::Invalid;
        }
        self.input.release();
        self.outbox.clear();
        self.previous = None;
        self.next = None;
    }

    fn instance(&mut self) -> Result<&mut Box<dyn FilterInstance>> {
        let name = self.filter.name();
        self.instance.as_mut().ok_or_else(|| {
            RasterwerkError::ChainProtocol(format!("active link {name} has no filter instance"))
        })
    }
}

/// Lines pass straight through when no filter accepted the image.
struct PassThrough {
    line: LineAccumulator,
    ready: bool,
}

/// An ordered set of filter slots, interpolation-only filters first.
///
/// Built once and reused: [`new_image`](Self::new_image) negotiates and
/// builds the filters for one image, [`end_image`](Self::end_image) tears
/// them down again.
pub struct ImageFilterChain {
    links: Vec<ChainLink>,
    /// Index of the first always-on filter.
    filter_start: usize,
    force_no_interpolation: bool,
    considered: Range<usize>,
    first: Option<usize>,
    last: Option<usize>,
    tick: Transaction,
    passthrough: Option<PassThrough>,
    controller: Option<Box<dyn FilterController>>,
    output: Option<FilteredImageArgs>,
}

impl ImageFilterChain {
    /// Build the slots named in `config`.
    pub fn new(config: &PipelineConfig) -> Self {
        let interpolators = config
            .interpolators
            .iter()
            .map(|name| expose(name, config))
            .collect();
        let filters = config
            .filters
            .iter()
            .map(|name| expose(name, config))
            .collect();
        let mut chain = Self::from_filters(interpolators, filters);
        chain.force_no_interpolation = config.force_no_interpolation;
        chain
    }

    /// Build a chain from filters already looked up.
    pub fn from_filters(interpolators: Vec<Filter>, filters: Vec<Filter>) -> Self {
        let filter_start = interpolators.len();
        let links = interpolators
            .into_iter()
            .chain(filters)
            .map(ChainLink::new)
            .collect();
        Self {
            links,
            filter_start,
            force_no_interpolation: false,
            considered: 0..0,
            first: None,
            last: None,
            tick: Transaction::empty(),
            passthrough: None,
            controller: None,
            output: None,
        }
    }

    pub fn set_controller(&mut self, controller: Box<dyn FilterController>) {
        self.controller = Some(controller);
    }

    pub fn set_force_no_interpolation(&mut self, force: bool) {
        self.force_no_interpolation = force;
    }

    // -- Accessors ------------------------------------------------------------

    /// Number of slots, dead ones included.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn link_state(&self, index: usize) -> Option<LinkState> {
        self.links.get(index).map(|link| link.state)
    }

    /// Names of the filters processing the current image, in order.
    pub fn active_filters(&self) -> Vec<&str> {
        self.active().map(|i| self.links[i].filter.name()).collect()
    }

    /// Shape of the lines [`pull`](Self::pull) produces for the current image.
    pub fn output_args(&self) -> Option<&FilteredImageArgs> {
        self.output.as_ref()
    }

    /// No line is buffered between links.
    pub fn is_drained(&self) -> bool {
        let links_idle = self.active().all(|i| {
            self.links[i].state == LinkState::Ready && self.links[i].input.available() == 0
        });
        let passthrough_idle = self.passthrough.as_ref().is_none_or(|p| !p.ready);
        links_idle && passthrough_idle
    }

    fn active(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.first, |&i| self.links[i].next)
    }

    // -- Negotiation ----------------------------------------------------------

    /// Negotiate the chain for one image and build every accepting filter.
    /// Returns the shape of the chain's output.
    ///
    /// On failure every filter built so far is dropped again.
    #[instrument(skip_all, fields(role = ?args.role, width = args.width, height = args.height))]
    pub fn new_image(
        &mut self,
        args: &FilteredImageArgs,
        ctx: &mut ImageContext,
    ) -> Result<FilteredImageArgs> {
        self.end_image();
        let interpolating = args.interpolate && !self.force_no_interpolation;
        let start = if interpolating { 0 } else { self.filter_start };
        self.considered = start..self.links.len();

        let mut running = args.clone();
        for i in self.considered.clone() {
            let link = &mut self.links[i];
            if link.state == LinkState::Dead {
                continue;
            }
            let name = link.filter.name();
            let mut changes = running.unchanged();
            if !link.filter.present(&running, &mut changes) {
                debug!(filter = name, "Filter declined image");
                continue;
            }
            if link.filter.resizable() {
                if let Some(controller) = &self.controller {
                    if controller.adjust(name, &running, &mut changes) {
                        debug!(
                            filter = name,
                            width = changes.width,
                            height = changes.height,
                            "Controller adjusted filter target"
                        );
                    }
                }
            }
            match link.filter.construct(&running, &changes, ctx) {
                Ok(instance) => {
                    debug!(
                        filter = name,
                        width = changes.width,
                        height = changes.height,
                        bpc = changes.bpc.bits(),
                        "Filter accepted image"
                    );
                    link.instance = Some(instance);
                    link.state = LinkState::Ready;
                    running = running.apply(&changes);
                }
                Err(err) => {
                    warn!(filter = name, error = %err, "Filter construction failed");
                    self.end_image();
                    return Err(err);
                }
            }
        }

        let mut previous: Option<usize> = None;
        for i in self.considered.clone() {
            if self.links[i].state != LinkState::Ready {
                continue;
            }
            self.links[i].previous = previous;
            match previous {
                Some(p) => self.links[p].next = Some(i),
                None => self.first = Some(i),
            }
            previous = Some(i);
        }
        self.last = previous;
        if self.first.is_none() {
            self.passthrough = Some(PassThrough {
                line: LineAccumulator::new(running.line_bytes())?,
                ready: false,
            });
        }

        info!(
            filters = ?self.active_filters(),
            out_width = running.width,
            out_height = running.height,
            "Filter chain negotiated"
        );
        self.output = Some(running.clone());
        Ok(running)
    }

    /// Drop every filter built for the current image and return the links to
    /// their pre-negotiation states. Safe to call at any time, repeatedly.
    pub fn end_image(&mut self) {
        for i in self.considered.clone() {
            self.links[i].reset();
        }
        self.considered = 0..0;
        self.first = None;
        self.last = None;
        self.passthrough = None;
        self.output = None;
    }

    // -- Data flow ------------------------------------------------------------

    /// Offer `data` to the head of the chain and move lines one step along
    /// every link. Whatever the head does not take stays in `data`.
    ///
    /// Returns whether anything was consumed, handed over or produced.
    pub fn push(&mut self, data: &mut Transaction) -> Result<bool> {
        let Some(first) = self.first else {
            return Ok(self.push_passthrough(data));
        };
        let mut progress = false;
        let mut current = Some(first);
        while let Some(i) = current {
            let next = self.links[i].next;
            progress |= self.unstall(i, next)?;
            let input = if i == first { Some(&mut *data) } else { None };
            progress |= self.push_link(i, input)?;
            if let Some(n) = next {
                progress |= self.pull_link(i, n)?;
            }
            current = next;
        }
        Ok(progress)
    }

    /// The next output line of the chain, if one is ready.
    pub fn pull(&mut self) -> Option<&[u8]> {
        match self.last {
            Some(last) => self.links[last].instance.as_mut()?.pull(),
            None => {
                let passthrough = self.passthrough.as_mut()?;
                if !passthrough.ready {
                    return None;
                }
                passthrough.ready = false;
                passthrough.line.clear();
                Some(passthrough.line.line())
            }
        }
    }

    fn push_passthrough(&mut self, data: &mut Transaction) -> bool {
        match self.passthrough.as_mut() {
            Some(passthrough) if !passthrough.ready => {
                let before = data.available();
                passthrough.ready = passthrough.line.fill(data);
                data.available() < before || passthrough.ready
            }
            _ => false,
        }
    }

    /// Deliver a stalled link's output once its successor can take it.
    fn unstall(&mut self, i: usize, next: Option<usize>) -> Result<bool> {
        let LinkState::Stalled { resume } = self.links[i].state else {
            return Ok(false);
        };
        let Some(n) = next else {
            return Err(RasterwerkError::ChainProtocol(format!(
                "tail link {} stalled",
                self.links[i].filter.name()
            )));
        };
        if self.links[n].state != LinkState::Ready {
            return Ok(false);
        }
        self.hand_over(i, n);
        self.links[i].state = LinkState::Locked { resume };
        Ok(true)
    }

    fn push_link(&mut self, i: usize, data: Option<&mut Transaction>) -> Result<bool> {
        let link = &mut self.links[i];
        match link.state {
            LinkState::Ready => {
                let instance = link.instance()?;
                match data {
                    Some(data) => {
                        let before = data.available();
                        instance.push(data)?;
                        Ok(data.available() < before)
                    }
                    None => {
                        instance.push(&mut self.tick)?;
                        Ok(false)
                    }
                }
            }
            LinkState::Pending => {
                let before = link.input.available();
                match link.instance.as_mut() {
                    Some(instance) => instance.push(&mut link.input)?,
                    None => {
                        return Err(RasterwerkError::ChainProtocol(format!(
                            "pending link {} has no filter instance",
                            link.filter.name()
                        )));
                    }
                }
                if link.input.available() > 0 {
                    return Ok(link.input.available() < before);
                }
                link.state = LinkState::Ready;
                if let Some(p) = link.previous {
                    self.unlock(p)?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn unlock(&mut self, p: usize) -> Result<()> {
        let link = &mut self.links[p];
        link.state = match link.state {
            LinkState::Locked { resume } => resume.into(),
            other => {
                return Err(RasterwerkError::ChainProtocol(format!(
                    "link {} was {other:?} while its successor held its output",
                    link.filter.name()
                )));
            }
        };
        Ok(())
    }

    /// Pull from a non-tail link and hand the line on, or stall with it.
    fn pull_link(&mut self, i: usize, n: usize) -> Result<bool> {
        let link = &mut self.links[i];
        let resume = match link.state {
            LinkState::Ready => Resume::Ready,
            LinkState::Pending => Resume::Pending,
            _ => return Ok(false),
        };
        let Some(instance) = link.instance.as_mut() else {
            return Ok(false);
        };
        let Some(line) = instance.pull() else {
            return Ok(false);
        };
        link.outbox.clear();
        link.outbox
            .try_reserve(line.len())
            .map_err(|_| RasterwerkError::Allocation { bytes: line.len() })?;
        link.outbox.extend_from_slice(line);

        if self.links[n].state == LinkState::Ready {
            self.hand_over(i, n);
            self.links[i].state = LinkState::Locked { resume };
        } else {
            self.links[i].state = LinkState::Stalled { resume };
        }
        Ok(true)
    }

    /// Move link `from`'s outbox into link `to`'s input, taking back the
    /// buffer `to` has finished with.
    fn hand_over(&mut self, from: usize, to: usize) {
        let (head, tail) = self.links.split_at_mut(to);
        let (sender, receiver) = (&mut head[from], &mut tail[0]);
        let line = std::mem::take(&mut sender.outbox);
        let len = line.len();
        if let Some(mut spent) = receiver.input.new_buffer(line, len) {
            spent.clear();
            sender.outbox = spent;
        }
        receiver.state = LinkState::Pending;
    }
}

impl Drop for ImageFilterChain {
    fn drop(&mut self) {
        self.end_image();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::filter::{FilteredImageResult, ImageFilter, SourceAttributes};
    use rasterwerk_core::geometry::{Affine, device_extent};
    use rasterwerk_core::types::{Bpc, ImageRole};

    /// Test filter: repeats every input line `copies` times, optionally at
    /// `widen` times the width (each sample repeated).
    #[derive(Clone)]
    struct Repeat {
        name: &'static str,
        copies: usize,
        widen: u32,
        accept: bool,
        resizable: bool,
        fail: bool,
        live: Rc<Cell<i32>>,
    }

    impl Repeat {
        fn new(name: &'static str, live: &Rc<Cell<i32>>) -> Self {
            Self {
                name,
                copies: 1,
                widen: 1,
                accept: true,
                resizable: false,
                fail: false,
                live: Rc::clone(live),
            }
        }

        fn boxed(self) -> Filter {
            Filter::Local(Box::new(self))
        }
    }

    impl ImageFilter for Repeat {
        fn name(&self) -> &'static str {
            self.name
        }

        fn present(&self, _args: &FilteredImageArgs, changes: &mut FilteredImageResult) -> bool {
            changes.width *= self.widen;
            self.accept
        }

        fn construct(
            &self,
            args: &FilteredImageArgs,
            target: &FilteredImageResult,
            _ctx: &mut ImageContext,
        ) -> Result<Box<dyn FilterInstance>> {
            if self.fail {
                return Err(RasterwerkError::FilterConstruct {
                    filter: self.name.into(),
                    reason: "told to fail".into(),
                });
            }
            self.live.set(self.live.get() + 1);
            Ok(Box::new(RepeatInstance {
                line: LineAccumulator::new(args.line_bytes())?,
                out: vec![0; target.width as usize],
                widen: (target.width / args.width) as usize,
                copies: self.copies,
                remaining: 0,
                live: Rc::clone(&self.live),
            }))
        }

        fn resizable(&self) -> bool {
            self.resizable
        }
    }

    struct RepeatInstance {
        line: LineAccumulator,
        out: Vec<u8>,
        widen: usize,
        copies: usize,
        remaining: usize,
        live: Rc<Cell<i32>>,
    }

    impl FilterInstance for RepeatInstance {
        fn push(&mut self, data: &mut Transaction) -> Result<()> {
            if self.remaining == 0 && self.line.fill(data) {
                for (i, out) in self.out.iter_mut().enumerate() {
                    *out = self.line.line()[i / self.widen];
                }
                self.line.clear();
                self.remaining = self.copies;
            }
            Ok(())
        }

        fn pull(&mut self) -> Option<&[u8]> {
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            Some(&self.out)
        }
    }

    impl Drop for RepeatInstance {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    fn gray_args(width: u32, height: u32, interpolate: bool) -> FilteredImageArgs {
        let transform = Affine::scale(2.0);
        let (device_width, device_height) = device_extent(&transform, width, height);
        FilteredImageArgs {
            width,
            height,
            device_width,
            device_height,
            colorants: 1,
            original_bpc: 8,
            bpc: Bpc::Eight,
            role: ImageRole::Image,
            interpolate,
            image_to_device: transform,
            source: SourceAttributes::default(),
        }
    }

    fn line(bytes: &[u8]) -> Transaction {
        let mut tx = Transaction::new(bytes.len()).expect("alloc");
        tx.write(bytes);
        tx
    }

    /// Push every line, pulling as we go, then flush until nothing moves.
    fn drive(chain: &mut ImageFilterChain, lines: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for bytes in lines {
            let mut tx = line(bytes);
            for _ in 0..100 {
                if tx.available() == 0 {
                    break;
                }
                chain.push(&mut tx).expect("push");
                while let Some(line) = chain.pull() {
                    out.push(line.to_vec());
                }
            }
            assert_eq!(tx.available(), 0, "chain never took the line");
        }
        for _ in 0..100 {
            let moved = chain.push(&mut Transaction::empty()).expect("push");
            let mut pulled = false;
            while let Some(line) = chain.pull() {
                out.push(line.to_vec());
                pulled = true;
            }
            if !moved && !pulled {
                break;
            }
        }
        out
    }

    #[test]
    fn empty_chain_passes_lines_through() {
        let mut chain = ImageFilterChain::from_filters(vec![], vec![]);
        let args = gray_args(3, 2, false);
        let out_args = chain
            .new_image(&args, &mut ImageContext::new())
            .expect("negotiate");
        assert_eq!(out_args, args);
        let lines = vec![vec![1, 2, 3], vec![4, 5, 6]];
        assert_eq!(drive(&mut chain, &lines), lines);
        assert!(chain.is_drained());
    }

    #[test]
    fn identity_links_preserve_order_and_settle_ready() {
        let live = Rc::new(Cell::new(0));
        let mut chain = ImageFilterChain::from_filters(
            vec![],
            vec![
                Repeat::new("a", &live).boxed(),
                Filter::Dead { name: "gone".into() },
                Repeat::new("b", &live).boxed(),
            ],
        );
        chain
            .new_image(&gray_args(2, 3, false), &mut ImageContext::new())
            .expect("negotiate");
        assert_eq!(chain.active_filters(), vec!["a", "b"]);
        assert_eq!(live.get(), 2);

        let lines = vec![vec![1, 2], vec![3, 4], vec![5, 6]];
        assert_eq!(drive(&mut chain, &lines), lines);
        assert!(chain.is_drained());
        assert_eq!(chain.link_state(0), Some(LinkState::Ready));
        assert_eq!(chain.link_state(2), Some(LinkState::Ready));

        chain.end_image();
        chain.end_image();
        assert_eq!(live.get(), 0);
        assert_eq!(chain.link_state(0), Some(LinkState::Invalid));
        assert_eq!(chain.link_state(1), Some(LinkState::Dead));
    }

    #[test]
    fn busy_successor_stalls_its_predecessor() {
        let live = Rc::new(Cell::new(0));
        let mut repeat = Repeat::new("repeat", &live);
        repeat.copies = 3;
        let mut chain = ImageFilterChain::from_filters(
            vec![],
            vec![
                repeat.boxed(),
                Repeat::new("first", &live).boxed(),
                Repeat::new("second", &live).boxed(),
            ],
        );
        chain
            .new_image(&gray_args(1, 1, false), &mut ImageContext::new())
            .expect("negotiate");

        // Nobody pulls the chain's output, so the tail fills up and the
        // pressure travels back to the head.
        let mut tx = line(&[9]);
        assert!(chain.push(&mut tx).expect("push"));
        assert_eq!(tx.available(), 0);
        chain.push(&mut Transaction::empty()).expect("push");
        assert_eq!(chain.link_state(1), Some(LinkState::Locked { resume: Resume::Ready }));
        assert_eq!(chain.link_state(2), Some(LinkState::Pending));
        chain.push(&mut Transaction::empty()).expect("push");
        assert_eq!(
            chain.link_state(0),
            Some(LinkState::Stalled {
                resume: Resume::Ready
            })
        );
        assert!(!chain.push(&mut Transaction::empty()).expect("push"));

        let mut out = Vec::new();
        while let Some(line) = chain.pull() {
            out.push(line.to_vec());
        }
        out.extend(drive(&mut chain, &[]));
        assert_eq!(out, vec![vec![9]; 3]);
        assert!(chain.is_drained());
    }

    #[test]
    fn size_changes_fold_into_later_links() {
        let live = Rc::new(Cell::new(0));
        let mut widen = Repeat::new("widen", &live);
        widen.widen = 2;
        let mut chain = ImageFilterChain::from_filters(
            vec![],
            vec![widen.boxed(), Repeat::new("copy", &live).boxed()],
        );
        let args = gray_args(2, 1, false);
        let out_args = chain
            .new_image(&args, &mut ImageContext::new())
            .expect("negotiate");
        assert_eq!(out_args.width, 4);
        assert_eq!(
            device_extent(&out_args.image_to_device, out_args.width, out_args.height),
            (args.device_width, args.device_height)
        );
        assert_eq!(drive(&mut chain, &[vec![1, 2]]), vec![vec![1, 1, 2, 2]]);
    }

    #[test]
    fn interpolators_only_run_when_asked() {
        let live = Rc::new(Cell::new(0));
        let mut chain = ImageFilterChain::from_filters(
            vec![Repeat::new("smooth-up", &live).boxed()],
            vec![Repeat::new("always", &live).boxed()],
        );
        let mut ctx = ImageContext::new();
        chain.new_image(&gray_args(1, 1, false), &mut ctx).expect("negotiate");
        assert_eq!(chain.active_filters(), vec!["always"]);

        chain.new_image(&gray_args(1, 1, true), &mut ctx).expect("negotiate");
        assert_eq!(chain.active_filters(), vec!["smooth-up", "always"]);

        chain.set_force_no_interpolation(true);
        chain.new_image(&gray_args(1, 1, true), &mut ctx).expect("negotiate");
        assert_eq!(chain.active_filters(), vec!["always"]);
        assert_eq!(live.get(), 1);
    }

    #[test]
    fn failed_construction_tears_down_earlier_filters() {
        let live = Rc::new(Cell::new(0));
        let mut broken = Repeat::new("broken", &live);
        broken.fail = true;
        let mut declined = Repeat::new("declined", &live);
        declined.accept = false;
        let mut chain = ImageFilterChain::from_filters(
            vec![],
            vec![
                Repeat::new("ok", &live).boxed(),
                declined.boxed(),
                broken.boxed(),
            ],
        );
        let err = chain
            .new_image(&gray_args(1, 1, false), &mut ImageContext::new())
            .expect_err("construction fails");
        assert!(matches!(err, RasterwerkError::FilterConstruct { .. }));
        assert_eq!(live.get(), 0);
        assert!(chain.active_filters().is_empty());
        assert_eq!(chain.link_state(0), Some(LinkState::Invalid));
    }

    struct DoubleWidth;

    impl FilterController for DoubleWidth {
        fn adjust(
            &self,
            _filter: &str,
            args: &FilteredImageArgs,
            target: &mut FilteredImageResult,
        ) -> bool {
            target.width = args.width * 2;
            true
        }
    }

    #[test]
    fn controller_only_resizes_resizable_filters() {
        let live = Rc::new(Cell::new(0));
        let mut resizable = Repeat::new("resizable", &live);
        resizable.resizable = true;
        let mut chain = ImageFilterChain::from_filters(
            vec![],
            vec![resizable.boxed(), Repeat::new("fixed", &live).boxed()],
        );
        chain.set_controller(Box::new(DoubleWidth));
        let out_args = chain
            .new_image(&gray_args(3, 1, false), &mut ImageContext::new())
            .expect("negotiate");
        assert_eq!(out_args.width, 6);
    }
}
