//! Per-command display styles.
//!
//! Styles are built once from the command list and stay read-only for the
//! whole run; the printer looks them up by task id for every report.

use crate::error::ConfigError;
use crate::model::CommandDescriptor;
use crossterm::style::Color;
use time::{OffsetDateTime, UtcOffset};

/// Pastel palette cycled across visible commands.
const PASTELS: [(u8, u8, u8); 8] = [
    (0xFF, 0xB3, 0xB3),
    (0xC1, 0xEF, 0xFF),
    (0xB5, 0xFF, 0xD6),
    (0xFF, 0xDB, 0xA4),
    (0xB5, 0xFF, 0xB9),
    (0xFF, 0x78, 0x78),
    (0xE0, 0xC0, 0x97),
    (0xFF, 0xE9, 0xAE),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStyle {
    pub task_id: usize,
    pub visible: bool,
    pub label: String,
    pub color: Color,
}

/// Styles indexed by task id.
#[derive(Debug, Clone, Default)]
pub struct StyleTable {
    styles: Vec<CommandStyle>,
}

impl StyleTable {
    pub fn get(&self, task_id: usize) -> Option<&CommandStyle> {
        self.styles.get(task_id).filter(|s| s.task_id == task_id)
    }
}

/// Display options taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct StyleOptions {
    /// Ids or display names whose output is suppressed.
    pub hide: Vec<String>,
    /// `index`, `name`, `command`, `none`, or a template using `{index}`, `{name}`, `{command}`.
    pub prefix: String,
    pub prefix_length: Option<usize>,
    /// Per-position color overrides; empty entries keep the palette color.
    pub colors: Vec<String>,
}

pub fn generate_styles(
    commands: &[CommandDescriptor],
    opts: &StyleOptions,
) -> Result<StyleTable, ConfigError> {
    let mut palette = PASTELS.iter().cycle();
    let mut styles = Vec::with_capacity(commands.len());

    for command in commands {
        let hidden = opts
            .hide
            .iter()
            .map(|h| h.trim())
            .any(|h| h == command.id.to_string() || h == command.display_name);
        if hidden {
            styles.push(CommandStyle {
                task_id: command.id,
                visible: false,
                label: String::new(),
                color: Color::Reset,
            });
            continue;
        }

        let &(r, g, b) = palette.next().unwrap_or(&PASTELS[0]);
        let color = match opts.colors.get(command.id).map(|c| c.trim()) {
            Some(spec) if !spec.is_empty() => parse_color(spec)?,
            _ => Color::Rgb { r, g, b },
        };

        styles.push(CommandStyle {
            task_id: command.id,
            visible: true,
            label: truncate(render_label(&opts.prefix, command), opts.prefix_length),
            color,
        });
    }

    Ok(StyleTable { styles })
}

fn render_label(template: &str, command: &CommandDescriptor) -> String {
    match template {
        "" | "name" => command.display_name.clone(),
        "index" => command.id.to_string(),
        "command" => command.command_line(),
        "none" => String::new(),
        other => other
            .replace("{index}", &command.id.to_string())
            .replace("{name}", &command.display_name)
            .replace("{command}", &command.command_line()),
    }
}

fn truncate(label: String, max_chars: Option<usize>) -> String {
    match max_chars {
        Some(max) if label.chars().count() > max => label.chars().take(max).collect(),
        _ => label,
    }
}

/// Parse `#rrggbb` or a basic ANSI color name.
pub fn parse_color(spec: &str) -> Result<Color, ConfigError> {
    if let Some(hex) = spec.strip_prefix('#') {
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| ConfigError::Color(spec.to_string()))
        };
        if hex.len() != 6 {
            return Err(ConfigError::Color(spec.to_string()));
        }
        return Ok(Color::Rgb {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        });
    }

    let color = match spec.to_ascii_lowercase().as_str() {
        "black" => Color::Black,
        "red" => Color::Red,
        "green" => Color::Green,
        "yellow" => Color::Yellow,
        "blue" => Color::Blue,
        "magenta" => Color::Magenta,
        "cyan" => Color::Cyan,
        "white" => Color::White,
        "gray" | "grey" => Color::Grey,
        "dark_gray" | "dark_grey" => Color::DarkGrey,
        _ => return Err(ConfigError::Color(spec.to_string())),
    };
    Ok(color)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Year4,
    Year2,
    Month,
    Day,
    Hour24,
    Hour12,
    Minute,
    Second,
    Millis,
    AmPm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Field(Field),
}

/// Timestamp pattern in the `yyyy-MM-dd HH:mm:ss.SSS` style.
///
/// Letters `y M d H h m s S a` are fields, `'quoted'` text is literal and any
/// other character is copied through.
#[derive(Debug, Clone)]
pub struct TimestampFormat {
    tokens: Vec<Token>,
    offset: UtcOffset,
}

impl TimestampFormat {
    pub const DEFAULT_PATTERN: &'static str = "yyyy-MM-dd HH:mm:ss.SSS";

    pub fn new(pattern: &str, offset: UtcOffset) -> Self {
        Self {
            tokens: tokenize(pattern),
            offset,
        }
    }

    /// Current wall-clock time in the configured offset.
    pub fn now(&self) -> String {
        self.format(OffsetDateTime::now_utc().to_offset(self.offset))
    }

    pub fn format(&self, at: OffsetDateTime) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Field(field) => out.push_str(&render_field(*field, at)),
            }
        }
        out
    }
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATTERN, UtcOffset::UTC)
    }
}

fn render_field(field: Field, at: OffsetDateTime) -> String {
    match field {
        Field::Year4 => format!("{:04}", at.year()),
        Field::Year2 => format!("{:02}", at.year().rem_euclid(100)),
        Field::Month => format!("{:02}", u8::from(at.month())),
        Field::Day => format!("{:02}", at.day()),
        Field::Hour24 => format!("{:02}", at.hour()),
        Field::Hour12 => {
            let h = at.hour() % 12;
            format!("{:02}", if h == 0 { 12 } else { h })
        }
        Field::Minute => format!("{:02}", at.minute()),
        Field::Second => format!("{:02}", at.second()),
        Field::Millis => format!("{:03}", at.millisecond()),
        Field::AmPm => (if at.hour() < 12 { "AM" } else { "PM" }).to_string(),
    }
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // '' is an escaped quote, otherwise copy through to the closing quote.
            if chars.get(i + 1) == Some(&'\'') {
                literal.push('\'');
                i += 2;
                continue;
            }
            let mut j = i + 1;
            while j < chars.len() && chars[j] != '\'' {
                literal.push(chars[j]);
                j += 1;
            }
            i = j + 1;
            continue;
        }

        let run = chars[i..].iter().take_while(|&&ch| ch == c).count();
        let field = match c {
            'y' if run <= 2 => Some(Field::Year2),
            'y' => Some(Field::Year4),
            'M' => Some(Field::Month),
            'd' => Some(Field::Day),
            'H' => Some(Field::Hour24),
            'h' => Some(Field::Hour12),
            'm' => Some(Field::Minute),
            's' => Some(Field::Second),
            'S' => Some(Field::Millis),
            'a' => Some(Field::AmPm),
            _ => None,
        };
        match field {
            Some(field) => {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(Token::Field(field));
                i += run;
            }
            None => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}
