//! Legacy flat-text flag encoding.
//!
//! Old region files stored state flags as a compact string such as
//! `"bp-tc"`: each character is a flag code, and `+` / `-` switch whether the
//! following codes are allowed or denied. Parsing starts in allow mode. `_`
//! followed by one character was an extended code for custom flags; those
//! are no longer supported and are skipped.

use tracing::warn;

use crate::flag::{Flag, State};
use crate::flags;

/// Single-character legacy code of a built-in state flag.
#[must_use]
pub fn flag_for_code(code: char) -> Option<&'static Flag<State>> {
    let flag: &'static Flag<State> = match code {
        'z' => &*flags::PASSTHROUGH,
        'b' => &*flags::BUILD,
        'p' => &*flags::PVP,
        'm' => &*flags::MOB_DAMAGE,
        'c' => &*flags::CREEPER_EXPLOSION,
        't' => &*flags::TNT,
        'l' => &*flags::LIGHTER,
        'f' => &*flags::FIRE_SPREAD,
        'F' => &*flags::LAVA_FIRE,
        'C' => &*flags::CHEST_ACCESS,
        _ => return None,
    };
    Some(flag)
}

/// Inverse of [`flag_for_code`].
#[must_use]
pub fn code_for_flag(name: &str) -> Option<char> {
    ['z', 'b', 'p', 'm', 'c', 't', 'l', 'f', 'F', 'C']
        .into_iter()
        .find(|&c| flag_for_code(c).is_some_and(|f| f.name() == name))
}

/// Parse a legacy flag string. Unknown and extended codes are logged and
/// skipped.
pub fn parse_flags(data: &str) -> Vec<(&'static Flag<State>, State)> {
    let mut parsed = Vec::new();
    let mut mode = State::Allow;
    let mut chars = data.chars();

    while let Some(k) = chars.next() {
        match k {
            '+' => mode = State::Allow,
            '-' => mode = State::Deny,
            '_' => match chars.next() {
                Some(ext) => warn!("Legacy flag '_{ext}' is a custom flag and is no longer supported"),
                None => {
                    warn!("_ read ahead fail in legacy flags {data:?}");
                    break;
                }
            },
            code => match flag_for_code(code) {
                Some(flag) => parsed.push((flag, mode)),
                None => warn!("Legacy flag '{code}' is unsupported"),
            },
        }
    }

    parsed
}

/// Encode state flags as a legacy string: allowed codes first, then `-` and
/// denied codes. Flags without a legacy code are dropped.
#[must_use]
pub fn encode_flags(values: &[(&Flag<State>, State)]) -> String {
    let codes = |wanted: State| -> String {
        values
            .iter()
            .filter(|(_, state)| *state == wanted)
            .filter_map(|(flag, _)| code_for_flag(flag.name()))
            .collect()
    };

    let allowed = codes(State::Allow);
    let denied = codes(State::Deny);
    if denied.is_empty() {
        allowed
    } else {
        format!("{allowed}-{denied}")
    }
}
