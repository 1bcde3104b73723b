use rand::Rng;

/// One physical key press on a US-QWERTY keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyStroke {
    pub keycode: u32,
    pub shift: bool,
}

impl KeyStroke {
    const fn plain(keycode: u32) -> Self {
        Self {
            keycode,
            shift: false,
        }
    }

    const fn shifted(keycode: u32) -> Self {
        Self {
            keycode,
            shift: true,
        }
    }
}

// Linux evdev keycodes (see linux/input-event-codes.h)
pub const KEY_1: u32 = 2;
pub const KEY_0: u32 = 11;
pub const KEY_MINUS: u32 = 12;
pub const KEY_EQUAL: u32 = 13;
pub const KEY_BACKSPACE: u32 = 14;
pub const KEY_TAB: u32 = 15;
pub const KEY_Q: u32 = 16;
pub const KEY_LEFTBRACE: u32 = 26;
pub const KEY_RIGHTBRACE: u32 = 27;
pub const KEY_ENTER: u32 = 28;
pub const KEY_LEFTCTRL: u32 = 29;
pub const KEY_A: u32 = 30;
pub const KEY_SEMICOLON: u32 = 39;
pub const KEY_APOSTROPHE: u32 = 40;
pub const KEY_GRAVE: u32 = 41;
pub const KEY_LEFTSHIFT: u32 = 42;
pub const KEY_BACKSLASH: u32 = 43;
pub const KEY_Z: u32 = 44;
pub const KEY_COMMA: u32 = 51;
pub const KEY_DOT: u32 = 52;
pub const KEY_SLASH: u32 = 53;
pub const KEY_RIGHTSHIFT: u32 = 54;
pub const KEY_LEFTALT: u32 = 56;
pub const KEY_SPACE: u32 = 57;
pub const KEY_RIGHTCTRL: u32 = 97;
pub const KEY_RIGHTALT: u32 = 100;

/// Modifiers released best-effort when a run ends abnormally.
pub const MODIFIER_KEYCODES: [u32; 6] = [
    KEY_LEFTSHIFT,
    KEY_RIGHTSHIFT,
    KEY_LEFTCTRL,
    KEY_RIGHTCTRL,
    KEY_LEFTALT,
    KEY_RIGHTALT,
];

const TOP_ROW: &str = "qwertyuiop";
const HOME_ROW: &str = "asdfghjkl";
const BOTTOM_ROW: &str = "zxcvbnm";
const DIGIT_ROW: &str = "1234567890";
const SHIFTED_DIGIT_ROW: &str = "!@#$%^&*()";

fn row_keycode(row: &str, first_keycode: u32, c: char) -> Option<u32> {
    row.chars()
        .position(|r| r == c)
        .map(|idx| first_keycode + idx as u32)
}

fn letter_keycode(lower: char) -> Option<u32> {
    row_keycode(TOP_ROW, KEY_Q, lower)
        .or_else(|| row_keycode(HOME_ROW, KEY_A, lower))
        .or_else(|| row_keycode(BOTTOM_ROW, KEY_Z, lower))
}

/// Map a character of the source text onto the ASCII character actually typed.
pub fn typed_char_for_output_char(c: char) -> Option<char> {
    match c {
        '\n' | '\t' => Some(c),
        '\r' => None,

        // Editors with smart-quote substitution turn these back into the
        // typographic forms.
        '’' | '‘' => Some('\''),
        '”' | '“' => Some('"'),

        c if c.is_ascii_graphic() || c == ' ' => Some(c),
        _ => None,
    }
}

pub fn keystroke_for_output_char(c: char) -> Option<KeyStroke> {
    typed_char_for_output_char(c).and_then(char_to_keystroke)
}

pub fn find_first_unsupported_char(text: &str) -> Option<(usize, char)> {
    text.chars()
        .enumerate()
        .find(|&(_idx, c)| keystroke_for_output_char(c).is_none())
}

pub fn char_to_keystroke(c: char) -> Option<KeyStroke> {
    if c.is_ascii_lowercase() {
        return letter_keycode(c).map(KeyStroke::plain);
    }
    if c.is_ascii_uppercase() {
        return letter_keycode(c.to_ascii_lowercase()).map(KeyStroke::shifted);
    }
    if let Some(code) = row_keycode(DIGIT_ROW, KEY_1, c) {
        return Some(KeyStroke::plain(code));
    }
    if let Some(code) = row_keycode(SHIFTED_DIGIT_ROW, KEY_1, c) {
        return Some(KeyStroke::shifted(code));
    }

    let stroke = match c {
        ' ' => KeyStroke::plain(KEY_SPACE),
        '\n' => KeyStroke::plain(KEY_ENTER),
        '\t' => KeyStroke::plain(KEY_TAB),
        '-' => KeyStroke::plain(KEY_MINUS),
        '_' => KeyStroke::shifted(KEY_MINUS),
        '=' => KeyStroke::plain(KEY_EQUAL),
        '+' => KeyStroke::shifted(KEY_EQUAL),
        '[' => KeyStroke::plain(KEY_LEFTBRACE),
        '{' => KeyStroke::shifted(KEY_LEFTBRACE),
        ']' => KeyStroke::plain(KEY_RIGHTBRACE),
        '}' => KeyStroke::shifted(KEY_RIGHTBRACE),
        ';' => KeyStroke::plain(KEY_SEMICOLON),
        ':' => KeyStroke::shifted(KEY_SEMICOLON),
        '\'' => KeyStroke::plain(KEY_APOSTROPHE),
        '"' => KeyStroke::shifted(KEY_APOSTROPHE),
        '`' => KeyStroke::plain(KEY_GRAVE),
        '~' => KeyStroke::shifted(KEY_GRAVE),
        '\\' => KeyStroke::plain(KEY_BACKSLASH),
        '|' => KeyStroke::shifted(KEY_BACKSLASH),
        ',' => KeyStroke::plain(KEY_COMMA),
        '<' => KeyStroke::shifted(KEY_COMMA),
        '.' => KeyStroke::plain(KEY_DOT),
        '>' => KeyStroke::shifted(KEY_DOT),
        '/' => KeyStroke::plain(KEY_SLASH),
        '?' => KeyStroke::shifted(KEY_SLASH),
        _ => return None,
    };
    Some(stroke)
}

/// Reverse of `char_to_keystroke`, for decoding recorded keystrokes.
pub fn char_for_keystroke(stroke: KeyStroke) -> Option<char> {
    let mut candidates = vec!['\n', '\t', ' '];
    candidates.extend((33u8..=126u8).map(char::from));
    candidates
        .into_iter()
        .find(|&c| char_to_keystroke(c) == Some(stroke))
}

fn qwerty_neighbors(lower: char) -> Option<&'static str> {
    let neighbors = match lower {
        'a' => "qwsz",
        'b' => "vghn",
        'c' => "xdfv",
        'd' => "ersfcx",
        'e' => "wsdr",
        'f' => "drtgvc",
        'g' => "ftyhbv",
        'h' => "gyujnb",
        'i' => "ujko",
        'j' => "huikmn",
        'k' => "jiolm",
        'l' => "kop",
        'm' => "njk",
        'n' => "bhjm",
        'o' => "iklp",
        'p' => "ol",
        'q' => "wa",
        'r' => "edft",
        's' => "awedxz",
        't' => "rfgy",
        'u' => "yihj",
        'v' => "cfgb",
        'w' => "qase",
        'x' => "zsdc",
        'y' => "tugh",
        'z' => "asx",
        _ => return None,
    };
    Some(neighbors)
}

pub fn has_qwerty_neighbors(c: char) -> bool {
    qwerty_neighbors(c.to_ascii_lowercase()).is_some()
}

/// A key physically next to `c`, keeping its case.
pub fn qwerty_adjacent_char(c: char, rng: &mut impl Rng) -> Option<char> {
    let neighbors: Vec<char> = qwerty_neighbors(c.to_ascii_lowercase())?.chars().collect();
    let chosen = neighbors[rng.gen_range(0..neighbors.len())];
    Some(match_case(c, chosen))
}

/// Any letter other than `c`, keeping its case.
pub fn random_letter_other_than(c: char, rng: &mut impl Rng) -> Option<char> {
    if !c.is_ascii_alphabetic() {
        return None;
    }
    let lower = c.to_ascii_lowercase();
    loop {
        let candidate = char::from(b'a' + rng.gen_range(0..26u8));
        if candidate != lower {
            return Some(match_case(c, candidate));
        }
    }
}

fn match_case(template: char, c: char) -> char {
    if template.is_ascii_uppercase() {
        c.to_ascii_uppercase()
    } else {
        c
    }
}
