//! UI command execution and the spoken-command fallback grammar.
//!
//! Structured [`UiCommand`]s run directly. Free-form phrases ("set the volume
//! to 5", "press send") go through an ordered rule list first; earlier rules
//! are more specific and must win over the general verb rules below them.

use std::sync::Arc;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::{Captures, Regex};
use shared::dom::{DomSurface, ElementHandle};
use shared::events::InterpreterEvent;
use shared::ui_command::{UiAction, UiCommand};
use tracing::{debug, warn};

use crate::context::EventSink;

const SCREENSAVER_TOGGLE: &str = "toggle-screensaver";
const THEME_SELECTS: &[&str] = &["theme-select", "theme-select-settings"];
const MODEL_SELECT: &str = "model-select";

/// A phrase recognized by the spoken grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpokenCommand {
    /// Maps onto a structured command
    Ui(UiCommand),
    /// `<verb> [the] <target>`, resolved with verb fallbacks
    Activate { verb: String, target: String },
    /// A lone verb such as "pause"
    Verb(String),
}

impl SpokenCommand {
    /// Structured equivalent, used when the phrase came in as a `ui` command.
    pub fn to_ui_command(&self) -> UiCommand {
        match self {
            SpokenCommand::Ui(cmd) => cmd.clone(),
            SpokenCommand::Activate { target, .. } => {
                UiCommand::new(UiAction::Click).with_target(target.clone())
            }
            SpokenCommand::Verb(verb) => UiCommand::new(UiAction::Click).with_target(verb.clone()),
        }
    }
}

struct GrammarRule {
    pattern: Regex,
    /// Match against the lower-cased phrase instead of the phrase as given
    lowercase: bool,
    build: fn(&Captures) -> SpokenCommand,
}

fn capture(caps: &Captures, idx: usize) -> String {
    caps.get(idx)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn rule(pattern: &str, lowercase: bool, build: fn(&Captures) -> SpokenCommand) -> GrammarRule {
    GrammarRule {
        pattern: Regex::new(pattern).expect("valid grammar pattern"),
        lowercase,
        build,
    }
}

static GRAMMAR: LazyLock<Vec<GrammarRule>> = LazyLock::new(|| {
    vec![
        rule(r"^(open|start)( the)? screensaver$", true, |_| {
            SpokenCommand::Ui(UiCommand::new(UiAction::OpenScreensaver))
        }),
        rule(r"^(close|stop)( the)? screensaver$", true, |_| {
            SpokenCommand::Ui(UiCommand::new(UiAction::CloseScreensaver))
        }),
        rule(r"change theme to\s+(.+)", true, |caps| {
            SpokenCommand::Ui(UiCommand::new(UiAction::ChangeTheme).with_target(capture(caps, 1)))
        }),
        rule(r"^(change|set|switch) model to (.+)$", true, |caps| {
            SpokenCommand::Ui(UiCommand::new(UiAction::ChangeModel).with_target(capture(caps, 2)))
        }),
        rule(r"(?i)^set (?:the )?(.+?) to[:]?\s*(.+)$", false, |caps| {
            SpokenCommand::Ui(
                UiCommand::new(UiAction::SetValue)
                    .with_target(capture(caps, 1))
                    .with_value(capture(caps, 2)),
            )
        }),
        rule(
            r"(?i)^(click|press|activate|toggle|open|start|close|stop|pause|resume|play|save|copy|hide|show|exit|fullscreen) (?:the )?(.+)$",
            false,
            |caps| SpokenCommand::Activate {
                verb: capture(caps, 1).to_lowercase(),
                target: capture(caps, 2),
            },
        ),
        rule(
            r"(?i)^(pause|resume|play|save|copy|hide|show|exit|fullscreen)$",
            false,
            |caps| SpokenCommand::Verb(capture(caps, 1)),
        ),
    ]
});

/// Match `phrase` against the ordered grammar; first rule wins.
pub fn parse_spoken(phrase: &str) -> Option<SpokenCommand> {
    let trimmed = phrase.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    GRAMMAR.iter().find_map(|rule| {
        let subject = if rule.lowercase { lower.as_str() } else { trimmed };
        rule.pattern.captures(subject).map(|caps| (rule.build)(&caps))
    })
}

/// Runs UI commands against the DOM surface and reports a chat reply.
pub struct UiExecutor {
    dom: Arc<dyn DomSurface>,
    events: EventSink,
}

impl UiExecutor {
    pub fn new(dom: Arc<dyn DomSurface>, events: EventSink) -> Self {
        Self { dom, events }
    }

    /// Execute a validated command and return the reply shown to the user.
    pub fn execute(&self, command: &UiCommand) -> Result<String> {
        if !command.is_valid() {
            bail!("invalid ui command: {:?}", command);
        }
        let target = command.target.as_deref().unwrap_or_default();
        let reply = match command.action {
            UiAction::OpenScreensaver => self.open_screensaver()?,
            UiAction::CloseScreensaver => self.close_screensaver()?,
            UiAction::ChangeTheme => self.change_theme(target)?,
            UiAction::ChangeModel => self.change_model(target)?,
            UiAction::SetValue => {
                self.set_value(target, command.value.as_deref().unwrap_or_default())?
            }
            UiAction::Click => {
                let element = self.dom.find_element(target).or_else(|| {
                    (target == "screensaver")
                        .then(|| self.dom.find_element("toggle screensaver"))
                        .flatten()
                });
                self.activate(element, target)?
            }
        };
        Ok(self.reply(reply))
    }

    /// Run a free-form phrase through the grammar. `None` when no rule matches.
    pub fn execute_spoken(&self, phrase: &str) -> Result<Option<String>> {
        let Some(spoken) = parse_spoken(phrase) else {
            debug!(phrase, "no spoken command matched");
            return Ok(None);
        };
        let reply = match spoken {
            SpokenCommand::Ui(command) => return self.execute(&command).map(Some),
            SpokenCommand::Activate { verb, target } => {
                let mut element = self.dom.find_element(&target);
                if element.is_none() && target == "screensaver" {
                    element = self.dom.find_element(&verb);
                }
                if element.is_none() {
                    element = self.dom.find_element(&format!("{verb} {target}"));
                }
                if element.is_none() {
                    element = self.dom.find_element(&verb);
                }
                self.activate(element, &target)?
            }
            SpokenCommand::Verb(verb) => {
                let element = self.dom.find_element(&verb);
                self.activate(element, &verb)?
            }
        };
        Ok(Some(self.reply(reply)))
    }

    fn reply(&self, text: String) -> String {
        self.events.send(InterpreterEvent::UiReply { text: text.clone() });
        text
    }

    fn toggle_screensaver(&self) -> Result<()> {
        match self.dom.find_element(SCREENSAVER_TOGGLE) {
            Some(toggle) => self.dom.click(&toggle),
            None => {
                warn!("screensaver toggle not found");
                Ok(())
            }
        }
    }

    fn open_screensaver(&self) -> Result<String> {
        if !self.dom.screensaver_active() {
            self.toggle_screensaver()?;
        }
        Ok("Just a second, opening the screensaver.".to_string())
    }

    fn close_screensaver(&self) -> Result<String> {
        if self.dom.screensaver_active() {
            self.toggle_screensaver()?;
        }
        Ok("Closing the screensaver.".to_string())
    }

    fn change_theme(&self, target: &str) -> Result<String> {
        let theme = target.split_whitespace().collect::<Vec<_>>().join("-");
        for id in THEME_SELECTS {
            if let Some(select) = self.dom.find_element(id) {
                self.dom.set_value(&select, &theme)?;
            }
        }
        Ok(format!("Theme changed to {theme}"))
    }

    fn change_model(&self, target: &str) -> Result<String> {
        let desired = target.trim();
        let chosen = match self.dom.find_element(MODEL_SELECT) {
            Some(select) => self.dom.select_option(&select, desired)?,
            None => None,
        };
        Ok(match chosen {
            Some(label) => format!("Model changed to {label}."),
            None => format!("I couldn't find a model named {desired}."),
        })
    }

    fn set_value(&self, target: &str, value: &str) -> Result<String> {
        let applied = match self.dom.find_element(target) {
            Some(element) => self.dom.set_value(&element, value)?,
            None => false,
        };
        Ok(if applied {
            format!("{target} set to {value}.")
        } else {
            format!("I couldn't find {target}.")
        })
    }

    fn activate(&self, element: Option<ElementHandle>, label: &str) -> Result<String> {
        match element {
            Some(element) => {
                self.dom.click(&element)?;
                Ok(format!("{label} activated."))
            }
            None => Ok(format!("I couldn't find {label}.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDom;

    fn executor(dom: Arc<FakeDom>) -> UiExecutor {
        UiExecutor::new(dom, EventSink::default())
    }

    #[test]
    fn test_grammar_order() {
        assert_eq!(
            parse_spoken("Open the screensaver"),
            Some(SpokenCommand::Ui(UiCommand::new(UiAction::OpenScreensaver)))
        );
        assert_eq!(
            parse_spoken("stop screensaver"),
            Some(SpokenCommand::Ui(UiCommand::new(UiAction::CloseScreensaver)))
        );
        assert_eq!(
            parse_spoken("please change theme to Ocean Breeze"),
            Some(SpokenCommand::Ui(
                UiCommand::new(UiAction::ChangeTheme).with_target("ocean breeze")
            ))
        );
        // the model rule must win over the generic "set X to Y" rule
        assert_eq!(
            parse_spoken("set model to mistral"),
            Some(SpokenCommand::Ui(
                UiCommand::new(UiAction::ChangeModel).with_target("mistral")
            ))
        );
        assert_eq!(
            parse_spoken("Set the Volume to: 5"),
            Some(SpokenCommand::Ui(
                UiCommand::new(UiAction::SetValue)
                    .with_target("Volume")
                    .with_value("5")
            ))
        );
        assert_eq!(
            parse_spoken("Press the send button"),
            Some(SpokenCommand::Activate {
                verb: "press".into(),
                target: "send button".into()
            })
        );
        assert_eq!(parse_spoken("Pause"), Some(SpokenCommand::Verb("Pause".into())));
        assert_eq!(parse_spoken("what is the weather"), None);
        assert_eq!(parse_spoken("  "), None);
    }

    #[test]
    fn test_spoken_to_ui_command() {
        let cmd = parse_spoken("click the ping").unwrap().to_ui_command();
        assert_eq!(cmd, UiCommand::new(UiAction::Click).with_target("ping"));
        assert!(cmd.is_valid());
    }

    #[test]
    fn test_click_replies() {
        let dom = Arc::new(FakeDom::standard());
        let exec = executor(dom.clone());

        let reply = exec
            .execute(&UiCommand::new(UiAction::Click).with_target("console"))
            .unwrap();
        assert_eq!(reply, "console activated.");

        let reply = exec
            .execute(&UiCommand::new(UiAction::Click).with_target("nowhere"))
            .unwrap();
        assert_eq!(reply, "I couldn't find nowhere.");
        assert_eq!(dom.clicked(), vec!["console"]);
    }

    #[test]
    fn test_screensaver_toggles_only_when_needed() {
        let dom = Arc::new(FakeDom {
            screensaver: true,
            ..FakeDom::standard()
        });
        let exec = executor(dom.clone());
        let reply = exec
            .execute(&UiCommand::new(UiAction::OpenScreensaver))
            .unwrap();
        assert_eq!(reply, "Just a second, opening the screensaver.");
        assert!(dom.clicked().is_empty());

        let reply = exec
            .execute(&UiCommand::new(UiAction::CloseScreensaver))
            .unwrap();
        assert_eq!(reply, "Closing the screensaver.");
        assert_eq!(dom.clicked(), vec!["toggle-screensaver"]);
    }

    #[test]
    fn test_theme_model_and_values() {
        let dom = Arc::new(FakeDom::standard());
        let exec = executor(dom.clone());

        let theme = exec
            .execute(&UiCommand::new(UiAction::ChangeTheme).with_target("dark  mode"))
            .unwrap();
        assert_eq!(theme, "Theme changed to dark-mode");

        let model = exec
            .execute(&UiCommand::new(UiAction::ChangeModel).with_target("mistral"))
            .unwrap();
        assert_eq!(model, "Model changed to Mistral Small.");
        let missing = exec
            .execute(&UiCommand::new(UiAction::ChangeModel).with_target("llama"))
            .unwrap();
        assert_eq!(missing, "I couldn't find a model named llama.");

        let set = exec
            .execute(
                &UiCommand::new(UiAction::SetValue)
                    .with_target("volume")
                    .with_value("7"),
            )
            .unwrap();
        assert_eq!(set, "volume set to 7.");
        let not_input = exec
            .execute(
                &UiCommand::new(UiAction::SetValue)
                    .with_target("ping")
                    .with_value("7"),
            )
            .unwrap();
        assert_eq!(not_input, "I couldn't find ping.");

        let values = dom.values.lock().clone();
        assert!(values.contains(&("theme-select".into(), "dark-mode".into())));
        assert!(values.contains(&("volume".into(), "7".into())));
    }

    #[test]
    fn test_invalid_command_rejected() {
        let exec = executor(Arc::new(FakeDom::standard()));
        assert!(exec.execute(&UiCommand::new(UiAction::Click)).is_err());
    }

    #[test]
    fn test_spoken_verb_fallbacks() {
        let dom = Arc::new(FakeDom::standard());
        let exec = executor(dom.clone());

        // "screensaver" resolves through its label before any fallback
        let reply = exec.execute_spoken("toggle the screensaver").unwrap();
        assert_eq!(reply.as_deref(), Some("screensaver activated."));

        // unknown target falls back to the verb's own control
        let reply = exec.execute_spoken("pause the music").unwrap();
        assert_eq!(reply.as_deref(), Some("music activated."));
        assert_eq!(dom.clicked(), vec!["toggle-screensaver", "pause"]);

        assert_eq!(exec.execute_spoken("hello there").unwrap(), None);
    }

    #[test]
    fn test_replies_published() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let exec = UiExecutor::new(Arc::new(FakeDom::standard()), EventSink::new(tx));
        exec.execute(&UiCommand::new(UiAction::Click).with_target("ping"))
            .unwrap();
        match rx.try_recv().unwrap() {
            InterpreterEvent::UiReply { text } => assert_eq!(text, "ping activated."),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
