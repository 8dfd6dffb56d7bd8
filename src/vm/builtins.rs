//! Built-in functions callable from scripts.
//!
//! Each entry lists the argument counts it recognizes ("forms"). A call with a
//! count between two forms is padded up to the next form, with zeros unless the
//! entry gives a default for that slot. Fewer arguments than the smallest form,
//! or more than the largest, is an arity error.

use std::collections::HashMap;

use rand::Rng;

use crate::error::{FillyError, FillyResult};
use crate::host::{AudioKind, AudioRequest};
use crate::stage::{Cast, DrawOp, TextItem};
use crate::{log_info, log_warn};

use super::evaluation_context::EvaluationContext;
use super::variable::VariableValue;

pub type BuiltinFn = fn(&mut EvaluationContext, &[VariableValue]) -> FillyResult<Option<VariableValue>>;

pub use super::variable::MAX_ARRAY_SIZE;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub forms: &'static [usize],
    /// Non-zero values for padded slots, by slot index.
    pub defaults: &'static [(usize, i64)],
    pub func: BuiltinFn,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("forms", &self.forms)
            .finish()
    }
}

impl Builtin {
    fn describe_forms(&self) -> String {
        match self.forms {
            [] => "0".to_string(),
            [single] => single.to_string(),
            forms if forms.windows(2).all(|w| w[1] == w[0] + 1) => {
                format!("{} to {}", forms[0], forms[forms.len() - 1])
            }
            forms => {
                let (last, rest) = forms.split_last().unwrap_or((&0, &[]));
                let rest: Vec<String> = rest.iter().map(|n| n.to_string()).collect();
                format!("{} or {}", rest.join(", "), last)
            }
        }
    }

    /// Checks the argument count and pads up to the next recognized form.
    pub fn normalize(&self, mut args: Vec<VariableValue>) -> FillyResult<Vec<VariableValue>> {
        let Some(&target) = self.forms.iter().find(|&&form| form >= args.len()) else {
            return Err(FillyError::arity(self.name, self.describe_forms(), args.len()));
        };
        if self.forms.first().map(|&min| args.len() < min).unwrap_or(false) {
            return Err(FillyError::arity(self.name, self.describe_forms(), args.len()));
        }
        for slot in args.len()..target {
            let default = self
                .defaults
                .iter()
                .find(|(index, _)| *index == slot)
                .map(|(_, value)| *value)
                .unwrap_or(0);
            args.push(VariableValue::Integer(default));
        }
        Ok(args)
    }
}

/// Name-indexed built-in table. Lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct BuiltinTable {
    entries: HashMap<String, Builtin>,
}

impl Default for BuiltinTable {
    fn default() -> Self {
        BuiltinTable::standard()
    }
}

impl BuiltinTable {
    pub fn empty() -> Self {
        BuiltinTable {
            entries: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut table = BuiltinTable::empty();
        for builtin in STANDARD {
            table.register(*builtin);
        }
        table
    }

    pub fn register(&mut self, builtin: Builtin) {
        self.entries.insert(builtin.name.to_lowercase(), builtin);
    }

    pub fn get(&self, name: &str) -> Option<&Builtin> {
        self.entries.get(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const fn builtin(name: &'static str, forms: &'static [usize], func: BuiltinFn) -> Builtin {
    Builtin {
        name,
        forms,
        defaults: &[],
        func,
    }
}

const STANDARD: &[Builtin] = &[
    builtin("PostMes", &[1, 2, 3, 4, 5], post_mes),
    builtin("DelMe", &[0], del_me),
    builtin("DelUs", &[0], del_us),
    builtin("DelAll", &[0], del_all),
    builtin("Random", &[1], random),
    builtin("Abs", &[1], abs),
    builtin("StrLen", &[1], str_len),
    Builtin {
        name: "SubStr",
        forms: &[2, 3],
        defaults: &[(2, -1)],
        func: sub_str,
    },
    builtin("StrFind", &[2], str_find),
    builtin("StrPrint", &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], str_print),
    builtin("StrToInt", &[1], str_to_int),
    builtin("IntToStr", &[1], int_to_str),
    builtin("ArrayNew", &[1, 2], array_new),
    builtin("ArraySize", &[1], array_size),
    builtin("GetTick", &[0], get_tick),
    builtin("GetMidiTick", &[0], get_midi_tick),
    builtin("LoadPic", &[1], load_pic),
    builtin("CreatePic", &[1, 2], create_pic),
    builtin("DelPic", &[1], del_pic),
    builtin("PicWidth", &[1], pic_width),
    builtin("PicHeight", &[1], pic_height),
    Builtin {
        name: "MovePic",
        forms: &[8, 9],
        defaults: &[(8, 1)],
        func: move_pic,
    },
    builtin("OpenWin", &[1, 5, 7, 8], open_win),
    builtin("MoveWin", &[3], move_win),
    builtin("CloseWin", &[1], close_win),
    builtin("PutCast", &[4, 5, 8, 12], put_cast),
    builtin("MoveCast", &[3, 7], move_cast),
    builtin("DelCast", &[1], del_cast),
    builtin("TextWrite", &[4], text_write),
    builtin("PlayMIDI", &[1], play_midi),
    builtin("PlayWAVE", &[1], play_wave),
    builtin("Debug", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9], debug),
];

fn int(args: &[VariableValue], i: usize) -> i64 {
    args.get(i).map(VariableValue::as_integer).unwrap_or(0)
}

fn string(args: &[VariableValue], i: usize) -> String {
    args.get(i).map(|v| v.to_string()).unwrap_or_default()
}

fn dimension(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

fn post_mes(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let param = |i: usize| args.get(i).cloned().unwrap_or_default();
    let params = [param(1), param(2), param(3), param(4)];
    let spawned = ctx.state.post_mes(int(args, 0), params);
    Ok(Some(VariableValue::Integer(spawned as i64)))
}

fn del_me(ctx: &mut EvaluationContext, _: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.sequencer.deactivate();
    Ok(None)
}

fn del_us(ctx: &mut EvaluationContext, _: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.deactivate_group(ctx.sequencer.group);
    ctx.sequencer.deactivate();
    Ok(None)
}

fn del_all(ctx: &mut EvaluationContext, _: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.deactivate_all();
    ctx.sequencer.deactivate();
    Ok(None)
}

fn random(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let max = int(args, 0);
    let value = if max <= 0 {
        0
    } else {
        rand::rng().random_range(0..max)
    };
    Ok(Some(VariableValue::Integer(value)))
}

fn abs(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let value = match &args[0] {
        VariableValue::Float(x) => VariableValue::Float(x.abs()),
        other => VariableValue::Integer(other.as_integer().wrapping_abs()),
    };
    Ok(Some(value))
}

fn str_len(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    Ok(Some(VariableValue::Integer(string(args, 0).chars().count() as i64)))
}

fn sub_str(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let text = string(args, 0);
    let start = int(args, 1).max(0) as usize;
    let len = int(args, 2);
    let chars = text.chars().skip(start);
    let res: String = if len < 0 {
        chars.collect()
    } else {
        chars.take(len as usize).collect()
    };
    Ok(Some(VariableValue::Str(res)))
}

fn str_find(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let haystack = string(args, 0);
    let needle = string(args, 1);
    let index = haystack
        .find(&needle)
        .map(|byte| haystack[..byte].chars().count() as i64)
        .unwrap_or(-1);
    Ok(Some(VariableValue::Integer(index)))
}

/// `%d`, `%s`, `%x` and `%%`; anything else is copied as is.
pub fn format_print(format: &str, args: &[VariableValue]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some('d') => {
                chars.next();
                let value = args.next().map(VariableValue::as_integer).unwrap_or(0);
                out.push_str(&value.to_string());
            }
            Some('x') => {
                chars.next();
                let value = args.next().map(VariableValue::as_integer).unwrap_or(0);
                out.push_str(&format!("{:x}", value));
            }
            Some('s') => {
                chars.next();
                if let Some(value) = args.next() {
                    out.push_str(&value.to_string());
                }
            }
            _ => out.push('%'),
        }
    }
    out
}

fn str_print(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let format = string(args, 0);
    Ok(Some(VariableValue::Str(format_print(&format, &args[1..]))))
}

fn str_to_int(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    Ok(Some(VariableValue::Integer(args[0].as_integer())))
}

fn int_to_str(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    Ok(Some(VariableValue::Str(args[0].as_integer().to_string())))
}

fn array_new(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let size = int(args, 0);
    if !(0..=MAX_ARRAY_SIZE).contains(&size) {
        return Err(FillyError::Type(format!("array size {} out of range", size)));
    }
    Ok(Some(VariableValue::Array(vec![args.get(1).cloned().unwrap_or_default(); size as usize])))
}

fn array_size(_: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let size = match &args[0] {
        VariableValue::Array(items) => items.len() as i64,
        _ => 0,
    };
    Ok(Some(VariableValue::Integer(size)))
}

fn get_tick(ctx: &mut EvaluationContext, _: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    Ok(Some(VariableValue::Integer(ctx.state.frame_tick as i64)))
}

fn get_midi_tick(ctx: &mut EvaluationContext, _: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    Ok(Some(VariableValue::Integer(ctx.state.midi_tick as i64)))
}

fn load_pic(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let path = string(args, 0);
    let (Some(assets), Some(decoder)) = (ctx.state.assets.clone(), ctx.state.decoder.clone()) else {
        log_warn!(ctx.logger, "[!] LoadPic('{}'): no asset loader attached", path);
        return Ok(Some(VariableValue::Integer(-1)));
    };
    let loaded = assets
        .read_file(&path)
        .and_then(|bytes| decoder.dimensions(&bytes));
    let id = match loaded {
        Ok((width, height)) => ctx.state.stage.load_picture(&path, width, height),
        Err(err) => {
            log_warn!(ctx.logger, "[!] LoadPic('{}'): {}", path, err);
            -1
        }
    };
    Ok(Some(VariableValue::Integer(id)))
}

fn create_pic(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let stage = &mut ctx.state.stage;
    let id = if args.len() == 1 {
        stage.copy_picture(int(args, 0)).unwrap_or(-1)
    } else {
        stage.create_picture(dimension(int(args, 0)), dimension(int(args, 1)))
    };
    Ok(Some(VariableValue::Integer(id)))
}

fn del_pic(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.stage.delete_picture(int(args, 0));
    Ok(None)
}

fn pic_width(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let width = ctx.state.stage.picture_size(int(args, 0)).map(|(w, _)| w).unwrap_or(0);
    Ok(Some(VariableValue::Integer(width as i64)))
}

fn pic_height(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let height = ctx.state.stage.picture_size(int(args, 0)).map(|(_, h)| h).unwrap_or(0);
    Ok(Some(VariableValue::Integer(height as i64)))
}

fn move_pic(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.stage.draw(DrawOp::MovePic {
        src: int(args, 0),
        src_x: int(args, 1),
        src_y: int(args, 2),
        width: int(args, 3),
        height: int(args, 4),
        dest: int(args, 5),
        dest_x: int(args, 6),
        dest_y: int(args, 7),
        mode: int(args, 8),
    });
    Ok(None)
}

fn open_win(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let id = ctx.state.stage.open_window(
        int(args, 0),
        int(args, 1),
        int(args, 2),
        int(args, 3),
        int(args, 4),
        int(args, 5),
        int(args, 6),
        int(args, 7),
    );
    Ok(Some(VariableValue::Integer(id)))
}

fn move_win(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.stage.move_window(int(args, 0), int(args, 1), int(args, 2));
    Ok(None)
}

fn close_win(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.stage.close_window(int(args, 0));
    Ok(None)
}

/// Spreads any `PutCast` form over the 12-slot layout:
/// `pic, dst, x, y, trans, sx, sy, w, h, dw, dh, mode`.
pub fn put_cast_layout(args: &[VariableValue]) -> [i64; 12] {
    let mut slots = [0i64; 12];
    slots[4] = -1;
    slots[11] = 1;
    let values: Vec<i64> = args.iter().map(VariableValue::as_integer).collect();
    match values.len() {
        8 => {
            slots[..4].copy_from_slice(&values[..4]);
            slots[5..9].copy_from_slice(&values[4..8]);
        }
        n => {
            let n = n.min(12);
            slots[..n].copy_from_slice(&values[..n]);
        }
    }
    slots
}

fn put_cast(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let s = put_cast_layout(args);
    let id = ctx.state.stage.put_cast(Cast {
        id: -1,
        picture: s[0],
        dest: s[1],
        x: s[2],
        y: s[3],
        transparent: s[4],
        src_x: s[5],
        src_y: s[6],
        width: s[7],
        height: s[8],
        dest_width: s[9],
        dest_height: s[10],
        mode: s[11],
    });
    Ok(Some(VariableValue::Integer(id)))
}

fn move_cast(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let source = (args.len() == 7).then(|| (int(args, 3), int(args, 4), int(args, 5), int(args, 6)));
    ctx.state
        .stage
        .move_cast(int(args, 0), int(args, 1), int(args, 2), source);
    Ok(None)
}

fn del_cast(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.stage.delete_cast(int(args, 0));
    Ok(None)
}

fn text_write(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.stage.text_write(TextItem {
        text: string(args, 0),
        picture: int(args, 1),
        x: int(args, 2),
        y: int(args, 3),
    });
    Ok(None)
}

fn play_midi(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.queue_audio(AudioRequest {
        kind: AudioKind::Midi,
        path: string(args, 0),
    });
    Ok(None)
}

fn play_wave(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    ctx.state.queue_audio(AudioRequest {
        kind: AudioKind::Wave,
        path: string(args, 0),
    });
    Ok(None)
}

fn debug(ctx: &mut EvaluationContext, args: &[VariableValue]) -> FillyResult<Option<VariableValue>> {
    let parts: Vec<String> = args.iter().map(|v| v.to_string()).collect();
    log_info!(ctx.logger, "[debug] seq {}: {}", ctx.sequencer.id, parts.join(" "));
    Ok(None)
}
