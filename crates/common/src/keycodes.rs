//! QEMU QKeyCode → emulator keyboard enum mapping.
//!
//! The table is deliberately total: every standard QKeyCode name a real
//! `send-key`/`input-send-event` caller relies on (including the navigation
//! cluster, function keys, and keypad) maps to a `KeyId` variant; anything
//! else maps to `KeyId::None`, which callers must treat as "log and
//! ignore," never as an error.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// The emulator's keyboard scancode identifier space. `None` is the sentinel
/// for an unrecognized QKeyCode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum KeyId {
    None,
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Num0, Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    F13, F14, F15, F16, F17, F18, F19, F20, F21, F22, F23, F24,
    Shift, ShiftR, Ctrl, CtrlR, Alt, AltR, MetaL, MetaR, Menu,
    Up, Down, Left, Right, Home, End, PgUp, PgDn, Insert, Delete,
    Ret, Esc, Tab, Spc, Backspace, CapsLock, NumLock, ScrollLock,
    Kp0, Kp1, Kp2, Kp3, Kp4, Kp5, Kp6, Kp7, Kp8, Kp9,
    KpDivide, KpMultiply, KpSubtract, KpAdd, KpEnter, KpDecimal,
    GraveAccent, Minus, Equal, Backslash, BracketLeft, BracketRight,
    Semicolon, Apostrophe, Comma, Dot, Slash, Less,
    Sysrq, Pause,
    Henkan, Muhenkan, Hiragana, Yen, Ro,
}

static TABLE: Lazy<HashMap<&'static str, KeyId>> = Lazy::new(|| {
    use KeyId::*;
    let mut m = HashMap::new();
    for (c, id) in [
        ("a", A), ("b", B), ("c", C), ("d", D), ("e", E), ("f", F), ("g", G),
        ("h", H), ("i", I), ("j", J), ("k", K), ("l", L), ("m", M), ("n", N),
        ("o", O), ("p", P), ("q", Q), ("r", R), ("s", S), ("t", T), ("u", U),
        ("v", V), ("w", W), ("x", X), ("y", Y), ("z", Z),
    ] {
        m.insert(c, id);
    }
    for (c, id) in [
        ("0", Num0), ("1", Num1), ("2", Num2), ("3", Num3), ("4", Num4),
        ("5", Num5), ("6", Num6), ("7", Num7), ("8", Num8), ("9", Num9),
    ] {
        m.insert(c, id);
    }
    for (c, id) in [
        ("f1", F1), ("f2", F2), ("f3", F3), ("f4", F4), ("f5", F5), ("f6", F6),
        ("f7", F7), ("f8", F8), ("f9", F9), ("f10", F10), ("f11", F11), ("f12", F12),
        ("f13", F13), ("f14", F14), ("f15", F15), ("f16", F16), ("f17", F17),
        ("f18", F18), ("f19", F19), ("f20", F20), ("f21", F21), ("f22", F22),
        ("f23", F23), ("f24", F24),
    ] {
        m.insert(c, id);
    }
    m.insert("shift", Shift);
    m.insert("shift_r", ShiftR);
    m.insert("ctrl", Ctrl);
    m.insert("ctrl_r", CtrlR);
    m.insert("alt", Alt);
    m.insert("alt_r", AltR);
    m.insert("meta_l", MetaL);
    m.insert("meta_r", MetaR);
    m.insert("menu", Menu);
    m.insert("up", Up);
    m.insert("down", Down);
    m.insert("left", Left);
    m.insert("right", Right);
    m.insert("home", Home);
    m.insert("end", End);
    m.insert("pgup", PgUp);
    m.insert("pgdn", PgDn);
    m.insert("insert", Insert);
    m.insert("delete", Delete);
    m.insert("ret", Ret);
    m.insert("esc", Esc);
    m.insert("tab", Tab);
    m.insert("spc", Spc);
    m.insert("backspace", Backspace);
    m.insert("caps_lock", CapsLock);
    m.insert("num_lock", NumLock);
    m.insert("scroll_lock", ScrollLock);
    m.insert("kp_0", Kp0);
    m.insert("kp_1", Kp1);
    m.insert("kp_2", Kp2);
    m.insert("kp_3", Kp3);
    m.insert("kp_4", Kp4);
    m.insert("kp_5", Kp5);
    m.insert("kp_6", Kp6);
    m.insert("kp_7", Kp7);
    m.insert("kp_8", Kp8);
    m.insert("kp_9", Kp9);
    m.insert("kp_divide", KpDivide);
    m.insert("kp_multiply", KpMultiply);
    m.insert("kp_subtract", KpSubtract);
    m.insert("kp_add", KpAdd);
    m.insert("kp_enter", KpEnter);
    m.insert("kp_decimal", KpDecimal);
    m.insert("grave_accent", GraveAccent);
    m.insert("minus", Minus);
    m.insert("equal", Equal);
    m.insert("backslash", Backslash);
    m.insert("bracket_left", BracketLeft);
    m.insert("bracket_right", BracketRight);
    m.insert("semicolon", Semicolon);
    m.insert("apostrophe", Apostrophe);
    m.insert("comma", Comma);
    m.insert("dot", Dot);
    m.insert("slash", Slash);
    m.insert("less", Less);
    m.insert("sysrq", Sysrq);
    m.insert("pause", Pause);
    m.insert("henkan", Henkan);
    m.insert("muhenkan", Muhenkan);
    m.insert("hiragana", Hiragana);
    m.insert("yen", Yen);
    m.insert("ro", Ro);
    m
});

/// Look up a QKeyCode string. Unrecognized names yield `KeyId::None` and
/// must be logged and ignored by the caller, never treated as an error.
pub fn lookup(qcode: &str) -> KeyId {
    TABLE.get(qcode).copied().unwrap_or(KeyId::None)
}
