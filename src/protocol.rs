//! Textual protocol builders for the external tool boundary.
//!
//! Everything here is a pure function from job parameters to strings:
//! resampler argument lists, the packed pitch-bend encoding, the generated
//! wavtool driver script, and the flag sanitizer that keeps user-supplied
//! flag strings from smuggling shell syntax into that script. Process
//! spawning lives with the backends; keeping the text generation separate
//! means the whole protocol is unit-testable without running anything.

use std::path::Path;

use crate::item::RenderItem;
use crate::music;
use crate::phrase::Flag;
use crate::wav::SAMPLE_RATE;

const BASE64_CHARS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// File name of the per-phone helper script inside the cache directory.
pub const HELPER_NAME: &str = "temp_helper.sh";

/// File name of the generated driver script inside the cache directory.
pub const SCRIPT_NAME: &str = "temp.sh";

/// Concatenate flags into the single string resamplers parse, e.g. `g-5Mt120`.
pub fn flags_string(flags: &[Flag]) -> String {
    let mut out = String::new();
    for flag in flags {
        out.push_str(&flag.key);
        if let Some(value) = flag.value {
            out.push_str(&value.to_string());
        }
    }
    out
}

/// Strip anything from a flag string that could escape the script context:
/// URL schemes, executable/script extensions, and shell metacharacters.
/// Only characters that appear in real resampler flags survive.
pub fn sanitize_flags(flags: &str) -> String {
    let mut s = flags.to_string();

    // Drop `scheme://` prefixes wherever they appear.
    while let Some(pos) = s.find("://") {
        let scheme_start = s[..pos]
            .rfind(|c: char| !c.is_ascii_alphanumeric())
            .map(|i| i + 1)
            .unwrap_or(0);
        s.replace_range(scheme_start..pos + 3, "");
    }

    // Drop known executable extensions, case-insensitively.
    const EXECUTABLE_EXTS: &[&str] = &[".exe", ".bat", ".cmd", ".com", ".sh", ".ps1", ".vbs"];
    let mut lowered = s.to_lowercase();
    for ext in EXECUTABLE_EXTS {
        while let Some(pos) = lowered.find(ext) {
            s.replace_range(pos..pos + ext.len(), "");
            lowered = s.to_lowercase();
        }
    }

    // Finally allowlist the characters flags are actually made of.
    s.retain(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_' | '.'));
    s
}

/// Pack pitch points into the UTAU wire format: each value is a signed
/// 12-bit integer spread over two base64 characters, and a run of equal
/// values collapses to `<pair>#<extra repeats>#`.
pub fn encode_pitches(pitches: &[i32]) -> String {
    let pairs: Vec<[u8; 2]> = pitches
        .iter()
        .map(|&p| {
            let n = p.clamp(-2048, 2047) as u16 & 0x0fff;
            [
                BASE64_CHARS[(n >> 6) as usize],
                BASE64_CHARS[(n & 0x3f) as usize],
            ]
        })
        .collect();

    let mut out = String::with_capacity(pairs.len() * 2);
    let mut i = 0;
    while i < pairs.len() {
        out.push(pairs[i][0] as char);
        out.push(pairs[i][1] as char);
        let mut repeats = 0;
        while i + repeats + 1 < pairs.len() && pairs[i + repeats + 1] == pairs[i] {
            repeats += 1;
        }
        if repeats > 0 {
            out.push('#');
            out.push_str(&repeats.to_string());
            out.push('#');
        }
        i += repeats + 1;
    }
    out
}

/// Positional argument list for an external resampler executable:
/// `<in> <out> <tone> <velocity> <flags> <offset> <length> <consonant>
/// <cutoff> <volume> <modulation> !<tempo> <pitch>`.
pub fn resampler_args(item: &RenderItem) -> Vec<String> {
    vec![
        item.input_temp.to_string_lossy().into_owned(),
        item.output_file.to_string_lossy().into_owned(),
        music::tone_name(item.tone),
        item.velocity.to_string(),
        sanitize_flags(&flags_string(&item.flags)),
        fmt_num(item.offset),
        fmt_num(item.required_length),
        fmt_num(item.consonant),
        fmt_num(item.cutoff),
        item.volume.to_string(),
        item.modulation.to_string(),
        format!("!{}", fmt_num(item.tempo)),
        encode_pitches(&item.pitches),
    ]
}

/// Envelope parameter string in classic wavtool order:
/// `p1 p2 p3 v1 v2 v3 v4 overlap p4 p5 v5`.
pub fn envelope_string(item: &RenderItem) -> String {
    let env = &item.envelope;
    [
        fmt_num((env[0].x - env[0].x) as f64),
        fmt_num((env[1].x - env[0].x) as f64),
        fmt_num((env[4].x - env[3].x) as f64),
        fmt_num(env[0].y as f64),
        fmt_num(env[1].y as f64),
        fmt_num(env[3].y as f64),
        fmt_num(env[4].y as f64),
        fmt_num(item.overlap_ms),
        fmt_num((env[4].x - env[4].x) as f64),
        fmt_num((env[2].x - env[1].x) as f64),
        fmt_num(env[2].y as f64),
    ]
    .join(" ")
}

/// The per-phone helper script: resample if the cached temp is missing,
/// then hand the segment to the wavtool.
pub fn helper_script() -> String {
    let mut s = String::new();
    s.push_str("#!/bin/sh\n");
    s.push_str("if [ ! -e \"$temp\" ]; then\n");
    s.push_str("  \"$resamp\" \"$1\" \"$temp\" \"$2\" \"$vel\" \"$flag\" \"$5\" \"$6\" \"$7\" \"$8\" $params\n");
    s.push_str("fi\n");
    s.push_str("\"$tool\" \"$output\" \"$temp\" $stp \"$3\" $env\n");
    s
}

/// Build the driver script that renders and concatenates every item with an
/// external wavtool binary. `output` and all item paths are embedded
/// relative to `cache_dir`, which is the script's working directory.
/// `resolve_resampler` maps an item's registry name to the executable path
/// the script should invoke.
pub fn wavtool_script(
    items: &[&RenderItem],
    tool_path: &Path,
    output: &Path,
    cache_dir: &Path,
    resolve_resampler: &dyn Fn(&str) -> String,
) -> String {
    let mut s = String::new();
    let tempo = items.first().map(|i| i.tempo).unwrap_or(120.0);
    s.push_str("#!/bin/sh\n");
    s.push_str("# project=\n");
    s.push_str(&format!("tempo={}\n", fmt_num(tempo)));
    s.push_str(&format!("samples={SAMPLE_RATE}\n"));
    s.push_str(&format!("oto=\"{}\"\n", cache_dir.display()));
    s.push_str(&format!("tool=\"{}\"\n", tool_path.display()));
    s.push_str(&format!("output=\"{}\"\n", relative_to(output, cache_dir)));
    s.push_str(&format!("helper={HELPER_NAME}\n"));
    s.push_str(&format!("cachedir=\"{}\"\n", cache_dir.display()));
    s.push_str("flag=\"\"\n");
    s.push_str("env=\"0 5 35 0 100 100 0\"\n");
    s.push_str("stp=0\n");
    s.push('\n');
    s.push_str("rm -f \"$output\"\n");
    s.push_str("mkdir -p \"$cachedir\"\n");
    s.push('\n');

    let total = items.len();
    for (index, item) in items.iter().enumerate() {
        let resampler_path = resolve_resampler(&item.resampler).replace('"', "");
        s.push_str(&format!("resamp=\"{resampler_path}\"\n"));
        s.push_str(&format!(
            "params=\"{} {} !{} {}\"\n",
            item.volume,
            item.modulation,
            fmt_num(item.tempo),
            encode_pitches(&item.pitches)
        ));
        s.push_str(&format!(
            "flag=\"{}\"\n",
            sanitize_flags(&flags_string(&item.flags))
        ));
        s.push_str(&format!("env=\"{}\"\n", envelope_string(item)));
        s.push_str(&format!("stp={}\n", fmt_num(item.skip_over)));
        s.push_str(&format!("vel={}\n", item.velocity));
        s.push_str(&format!(
            "temp=\"$cachedir/{}\"\n",
            relative_to(&item.output_file, cache_dir)
        ));
        let duration_ticks =
            music::ms_to_tick(item.tempo, item.position_ms_duration()).round() as i64;
        let dur = format!("{}@{}+0", duration_ticks, fmt_num(item.tempo));
        s.push_str(&format!("echo '{}'\n", progress_bar(index + 1, total)));
        s.push_str("export tool resamp flag env stp vel params temp output oto cachedir\n");
        s.push_str(&format!(
            "sh \"$helper\" \"$oto/{}\" {} {} {} {} {} {} {} {}\n",
            relative_to(&item.input_temp, cache_dir),
            music::tone_name(item.tone),
            dur,
            fmt_num(item.preutter_ms),
            fmt_num(item.offset),
            fmt_num(item.required_length),
            fmt_num(item.consonant),
            fmt_num(item.cutoff),
            index
        ));
    }
    s
}

impl RenderItem {
    /// Nominal duration of the phone in ms, reconstructed from its envelope
    /// extent; used only for the script protocol's `dur@tempo` field.
    fn position_ms_duration(&self) -> f64 {
        (self.envelope[4].x - self.envelope[0].x) as f64
    }
}

fn progress_bar(index: usize, total: usize) -> String {
    const WIDTH: usize = 40;
    let fill = index * WIDTH / total.max(1);
    format!("{}{}({index}/{total})", "#".repeat(fill), "-".repeat(WIDTH - fill))
}

fn relative_to(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Minimal decimal formatting: integral values lose the trailing `.0` so
/// the command lines match what classic tools expect.
fn fmt_num(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_concatenate_keys_and_values() {
        let flags = vec![
            Flag::new("g", Some(-5), "gen"),
            Flag::new("Mt", Some(120), "mod"),
            Flag::new("N", None, "nfl"),
        ];
        assert_eq!(flags_string(&flags), "g-5Mt120N");
    }

    #[test]
    fn sanitizer_strips_schemes_and_script_extensions() {
        assert_eq!(sanitize_flags("http://evil.sh"), "evil");
        assert_eq!(sanitize_flags("g-5;rm -rf /"), "g-5rm-rf");
        assert_eq!(sanitize_flags("payload.EXE"), "payload");
        assert_eq!(sanitize_flags("g-5`$(id)`"), "g-5id");
        assert_eq!(sanitize_flags("g-5Mt120"), "g-5Mt120");
    }

    #[test]
    fn pitch_encoding_packs_signed_12_bit_pairs() {
        assert_eq!(encode_pitches(&[0]), "AA");
        assert_eq!(encode_pitches(&[-1]), "//");
        assert_eq!(encode_pitches(&[1]), "AB");
        // Out-of-range values clamp instead of wrapping.
        assert_eq!(encode_pitches(&[9999]), encode_pitches(&[2047]));
    }

    #[test]
    fn pitch_encoding_run_length_collapses_repeats() {
        assert_eq!(encode_pitches(&[0, 0, 0, 0]), "AA#3#");
        assert_eq!(encode_pitches(&[5, 0, 0, 5]), "AF AA#1# AF".replace(' ', ""));
    }

    #[test]
    fn resampler_args_follow_positional_contract() {
        let (_dir, item) = crate::item::tests_support::sample_item();
        let args = resampler_args(&item);
        assert_eq!(args.len(), 13);
        assert_eq!(args[2], music::tone_name(item.tone));
        assert_eq!(args[3], item.velocity.to_string());
        assert!(args[11].starts_with('!'));
        // Flags slot is sanitized in place.
        assert!(!args[4].contains(';'));
    }

    #[test]
    fn script_embeds_sanitized_flags_only() {
        let (_dir, mut item) = crate::item::tests_support::sample_item();
        item.flags = vec![Flag::new("http://evil.sh", None, "x")];
        let cache_dir = std::env::temp_dir();
        let script = wavtool_script(
            &[&item],
            Path::new("/tools/wavtool"),
            &cache_dir.join("phrase.wav"),
            &cache_dir,
            &|name| format!("/tools/{name}"),
        );
        assert!(script.contains("flag=\"evil\""));
        assert!(!script.contains("http://"));
        assert!(script.contains("tool=\"/tools/wavtool\""));
        assert!(script.contains("resamp=\"/tools/native\""));
        assert!(script.contains(HELPER_NAME));
    }

    #[test]
    fn helper_invokes_resampler_then_wavtool() {
        let helper = helper_script();
        let resamp = helper.find("$resamp").unwrap();
        let tool = helper.find("$tool\"").unwrap();
        assert!(resamp < tool);
    }
}
