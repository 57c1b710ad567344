//! Control directives recognised by the scheduler.
//!
//! Each command's directive kind is classified once, when the script is
//! compiled, so the playback loop matches on a [`Directive`] instead of
//! re-testing string prefixes on every step.
//!
//! To add a directive, give it a variant here and one entry in [`REGISTRY`].

mod auto_busy;
mod auto_countdown;
mod padding;

pub use auto_busy::{AutoBusy, AutoMare};
pub use auto_countdown::{
    COUNTDOWN_MIN_REGION, CountdownMode, REACTION_OFFSET, countdown_offset, schedule_countdown,
};
pub use padding::Padding;

/// What the scheduler does with a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Send the text to the host verbatim.
    Dispatch,
    /// Empty text: only the wait is honoured.
    Hold,
    /// `/loop`
    Loop,
    /// `/autobusy`, `/autobussy`
    AutoBusy(AutoBusy),
    /// `/automare`
    AutoMare,
    /// `/autocountdown [start|off]`, `/autocd [start|off]`
    AutoCountdown(CountdownMode),
    /// `/autoping`
    AutoPing,
    /// `/acancel`: animation cancel, then dispatched like any other line.
    AnimationCancel,
    /// `/pad [N] <cmd>`, `/padding [N] <cmd>`
    Pad(Padding),
    /// `/microcancel`: consumed, never sent.
    MicroCancel,
}

impl Directive {
    /// Classify command text. Anything unrecognised is [`Directive::Dispatch`].
    pub fn classify(text: &str) -> Self {
        if text.is_empty() {
            return Self::Hold;
        }
        REGISTRY
            .iter()
            .find_map(|(keyword, rule, parse)| {
                rule.args(text, keyword).and_then(|args| parse(args))
            })
            .unwrap_or(Self::Dispatch)
    }

    /// Whether the command is consumed by the scheduler without holding for
    /// its wait time.
    pub fn skips_wait(&self) -> bool {
        !matches!(self, Self::Dispatch | Self::Hold | Self::AnimationCancel)
    }
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    Exact,
    Prefix,
}

impl Rule {
    /// Return the argument text following `keyword`, if `text` matches.
    fn args<'a>(self, text: &'a str, keyword: &str) -> Option<&'a str> {
        match self {
            Rule::Exact => (text == keyword).then_some(""),
            Rule::Prefix => text.strip_prefix(keyword),
        }
    }
}

type ParseFn = fn(&str) -> Option<Directive>;

static REGISTRY: &[(&str, Rule, ParseFn)] = &[
    ("/loop", Rule::Exact, parse_loop),
    ("/microcancel", Rule::Exact, parse_microcancel),
    (AutoBusy::DECORATED_NAME, Rule::Prefix, AutoBusy::parse_decorated),
    (AutoBusy::NAME, Rule::Prefix, AutoBusy::parse_plain),
    (AutoMare::NAME, Rule::Prefix, AutoMare::parse),
    (CountdownMode::NAME, Rule::Prefix, CountdownMode::parse_directive),
    (CountdownMode::SHORT_NAME, Rule::Prefix, CountdownMode::parse_directive),
    ("/autoping", Rule::Prefix, parse_autoping),
    ("/acancel", Rule::Prefix, parse_acancel),
    ("/padding ", Rule::Prefix, Padding::parse_directive),
    ("/pad ", Rule::Prefix, Padding::parse_directive),
];

fn parse_loop(_: &str) -> Option<Directive> {
    Some(Directive::Loop)
}

fn parse_microcancel(_: &str) -> Option<Directive> {
    Some(Directive::MicroCancel)
}

fn parse_autoping(_: &str) -> Option<Directive> {
    Some(Directive::AutoPing)
}

fn parse_acancel(_: &str) -> Option<Directive> {
    Some(Directive::AnimationCancel)
}
