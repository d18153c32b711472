//! A synthetic host for running the server without a simulator.
//!
//! Every panel shows a rotating sweep over a page-coloured background. The
//! menu button (14) cycles pages and soft keys toggle their highlight.
//! Select (13) clears the highlight; power (99) stops rendering the panel.

use std::collections::HashMap;
use std::sync::Arc;

use crate::host::{ButtonAction, PanelHost};
use crate::panel::{ButtonLabels, Frame, PanelResource, BUTTONS_PER_SIDE};

pub const PANEL_SIZE: u32 = 256;

struct Page {
    name: &'static str,
    color: [u8; 3],
    labels: [Option<&'static str>; BUTTONS_PER_SIDE * 2],
}

#[rustfmt::skip]
const PAGES: [Page; 3] = [
    Page {
        name: "NAV",
        color: [10, 40, 20],
        labels: [
            Some("HDG"), Some("TRK"), Some("WPT"), None, Some("RNG+"), Some("RNG-"),
            Some("ARC"), Some("ROSE"), Some("MAP"), None, None, Some("ENG"),
        ],
    },
    Page {
        name: "ENG",
        color: [40, 20, 10],
        labels: [
            Some("N1"), Some("N2"), Some("EGT"), Some("FF"), None, None,
            None, None, None, None, Some("NAV"), Some("FUEL"),
        ],
    },
    Page {
        name: "FUEL",
        color: [10, 20, 40],
        labels: [
            Some("L"), Some("C"), Some("R"), None, Some("XFR"), None,
            None, None, None, None, Some("ENG"), Some("NAV"),
        ],
    },
];

struct DemoPanel {
    panel: Arc<PanelResource>,
    page: usize,
    selected: Option<u32>,
}

/// [`PanelHost`] that renders synthetic panels.
pub struct DemoHost {
    panels: HashMap<u64, DemoPanel>,
    frame: u64,
    render_every: u64,
}

impl DemoHost {
    /// `render_every`: host frames between two renders of each panel.
    pub fn new(render_every: u64) -> Self {
        Self {
            panels: HashMap::new(),
            frame: 0,
            render_every: render_every.max(1),
        }
    }

    pub fn panel_count(&self) -> usize {
        self.panels.len()
    }

    /// One host frame: render every panel whose turn it is.
    pub fn advance(&mut self) {
        self.frame += 1;
        if self.frame % self.render_every != 0 {
            return;
        }
        for demo in self.panels.values() {
            demo.panel.set_frame(render(demo, self.frame));
        }
    }
}

impl PanelHost for DemoHost {
    fn register(&mut self, panel: &Arc<PanelResource>) -> bool {
        tracing::debug!(key = %panel.key(), "demo panel attached");
        self.panels.insert(
            panel.id(),
            DemoPanel {
                panel: Arc::clone(panel),
                page: 0,
                selected: None,
            },
        );
        true
    }

    fn unregister(&mut self, panel: &Arc<PanelResource>) {
        self.panels.remove(&panel.id());
    }

    fn refresh(&mut self, panel: &Arc<PanelResource>) {
        if let Some(demo) = self.panels.get(&panel.id()) {
            panel.set_frame(render(demo, self.frame));
        }
    }

    fn press(&mut self, panel: &Arc<PanelResource>, action: ButtonAction) {
        let Some(demo) = self.panels.get_mut(&panel.id()) else {
            return;
        };
        match action {
            ButtonAction::Menu => {
                demo.page = (demo.page + 1) % PAGES.len();
                demo.selected = None;
            }
            ButtonAction::Select => demo.selected = None,
            ButtonAction::Button(n) if (n as usize) < BUTTONS_PER_SIDE * 2 => {
                demo.selected = if demo.selected == Some(n) { None } else { Some(n) };
            }
            ButtonAction::Button(_) => {}
            ButtonAction::Power => {
                self.panels.remove(&panel.id());
            }
        }
    }

    fn labels(&mut self, panel: &Arc<PanelResource>) -> ButtonLabels {
        let Some(demo) = self.panels.get(&panel.id()) else {
            return ButtonLabels::default();
        };
        let page = &PAGES[demo.page];
        ButtonLabels::from_slots(page.labels.iter().enumerate().map(|(slot, label)| {
            label.map(|text| {
                if demo.selected == Some(slot as u32) {
                    format!("[{text}]")
                } else {
                    text.to_string()
                }
            })
        }))
    }
}

fn render(demo: &DemoPanel, frame: u64) -> Frame {
    let page = &PAGES[demo.page];
    let size = PANEL_SIZE as usize;
    let sweep = (frame as usize * 4) % size;
    let mut pixels = Vec::with_capacity(size * size * 4);
    for y in 0..size {
        for x in 0..size {
            let border = x < 4 || y < 4 || x >= size - 4 || y >= size - 4;
            let [r, g, b] = if border {
                [200, 200, 200]
            } else if x.abs_diff(sweep) < 3 {
                [40, 230, 90]
            } else if demo.selected.is_some_and(|slot| row_of(slot) == y * BUTTONS_PER_SIDE / size) {
                page.color.map(|c| c.saturating_mul(3))
            } else {
                page.color
            };
            pixels.extend_from_slice(&[r, g, b, 255]);
        }
    }
    tracing::trace!(key = %demo.panel.key(), page = page.name, frame, "rendered demo panel");
    Frame {
        width: PANEL_SIZE,
        height: PANEL_SIZE,
        pixels,
    }
}

/// Screen row (0..6) next to a soft key.
fn row_of(slot: u32) -> usize {
    slot as usize % BUTTONS_PER_SIDE
}
