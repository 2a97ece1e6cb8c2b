use owo_colors::{OwoColorize, Style};

/// Colours device listings when stdout is a terminal.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    /// Module role such as `master`.
    pub(crate) fn role(&self, text: &str) -> String {
        self.paint(text, Style::new().bold().cyan())
    }

    pub(crate) fn mac(&self, text: &str) -> String {
        self.paint(text, Style::new().bold())
    }

    /// A field the module did not report.
    pub(crate) fn unknown(&self, text: &str) -> String {
        self.paint(text, Style::new().dimmed())
    }

    /// A difference from the configured topology.
    pub(crate) fn mismatch(&self, text: &str) -> String {
        self.paint(text, Style::new().bold().yellow())
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.use_colour {
            text.style(style).to_string()
        } else {
            text.to_owned()
        }
    }
}
