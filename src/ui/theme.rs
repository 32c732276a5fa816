use crate::ui::Icons;
use owo_colors::{OwoColorize, Style};
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// What `prepare` did to the tables of one type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Created,
    Reset,
    Unchanged,
}

impl TableState {
    pub fn label(self) -> &'static str {
        match self {
            TableState::Created => "created",
            TableState::Reset => "reset (schema drift)",
            TableState::Unchanged => "unchanged",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            TableState::Created => Icons::NEW,
            TableState::Reset => Icons::RESET,
            TableState::Unchanged => " ",
        }
    }
}

/// Message levels plus the states a mirrored type shows up in
#[derive(Debug, Clone)]
pub struct Theme {
    pub header: Style,
    pub success: Style,
    pub error: Style,
    pub warn: Style,
    pub info: Style,
    pub dim: Style,
    pub created: Style,
    pub reset: Style,
    pub full_sync: Style,
    pub incremental_sync: Style,
    pub local: Style,
    pub remote: Style,
}

impl Theme {
    /// Colored on a terminal, plain otherwise
    pub fn detect() -> Self {
        Self::for_terminal(console::Term::stdout().is_term())
    }

    pub fn for_terminal(is_term: bool) -> Self {
        if is_term { Self::colored() } else { Self::plain() }
    }

    pub fn colored() -> Self {
        Self {
            header: Style::new().cyan().bold(),
            success: Style::new().green().bold(),
            error: Style::new().red().bold(),
            warn: Style::new().yellow().bold(),
            info: Style::new().magenta(),
            dim: Style::new().bright_black(),
            created: Style::new().green(),
            reset: Style::new().yellow(),
            full_sync: Style::new().blue().bold(),
            incremental_sync: Style::new().cyan(),
            local: Style::new().green(),
            remote: Style::new().bright_black().italic(),
        }
    }

    pub fn plain() -> Self {
        Self {
            header: Style::new(),
            success: Style::new(),
            error: Style::new(),
            warn: Style::new(),
            info: Style::new(),
            dim: Style::new(),
            created: Style::new(),
            reset: Style::new(),
            full_sync: Style::new(),
            incremental_sync: Style::new(),
            local: Style::new(),
            remote: Style::new(),
        }
    }

    pub fn table_state(&self, state: TableState) -> Style {
        match state {
            TableState::Created => self.created.clone(),
            TableState::Reset => self.reset.clone(),
            TableState::Unchanged => self.dim.clone(),
        }
    }

    /// `<icon> <type> <state>` line of a prepare report
    pub fn prepare_line(&self, entity: &str, state: TableState) -> String {
        format!(
            "{} {} {}",
            state.icon().style(self.table_state(state)),
            entity,
            state.label().style(self.dim.clone())
        )
    }

    /// `full` or `incremental`, styled by mode
    pub fn sync_mode(&self, full: bool) -> String {
        if full {
            "full".style(self.full_sync.clone()).to_string()
        } else {
            "incremental".style(self.incremental_sync.clone()).to_string()
        }
    }

    /// Whether a type's data is held locally or still read from the remote
    pub fn locality(&self, local: bool) -> String {
        if local {
            "local".style(self.local.clone()).to_string()
        } else {
            "remote".style(self.remote.clone()).to_string()
        }
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_prepare_lines() {
        let theme = Theme::for_terminal(false);
        assert_eq!(theme.prepare_line("Task", TableState::Created), format!("{} Task created", Icons::NEW));
        assert_eq!(
            theme.prepare_line("Task", TableState::Reset),
            format!("{} Task reset (schema drift)", Icons::RESET)
        );
        assert_eq!(theme.prepare_line("Note", TableState::Unchanged), "  Note unchanged");
    }

    #[test]
    fn test_plain_sync_mode_and_locality() {
        let theme = Theme::plain();
        assert_eq!(theme.sync_mode(true), "full");
        assert_eq!(theme.sync_mode(false), "incremental");
        assert_eq!(theme.locality(true), "local");
        assert_eq!(theme.locality(false), "remote");
    }

    #[test]
    fn test_colored_output_carries_escapes() {
        let theme = Theme::for_terminal(true);
        let mode = theme.sync_mode(true);
        assert!(mode.contains("full"));
        assert!(mode.contains('\u{1b}'));
        assert!(theme.prepare_line("Task", TableState::Reset).contains("Task"));
    }
}
