// Locale safeguard pass: if the environment has no UTF-8 locale
// indicator, inject a best-effort UTF-8 locale so the child doesn't fall
// back to a C locale that mangles UTF-8 output.

use std::ffi::OsString;

const CANDIDATES: &[&str] = &["C.UTF-8", "POSIX.UTF-8"];

fn is_utf8_locale(value: &str) -> bool {
    value.to_ascii_uppercase().contains("UTF-8") || value.to_ascii_uppercase().contains("UTF8")
}

fn find(env: &[(OsString, OsString)], key: &str) -> Option<String> {
    env.iter()
        .find(|(k, _)| k.to_string_lossy() == key)
        .map(|(_, v)| v.to_string_lossy().into_owned())
}

fn set(env: &mut Vec<(OsString, OsString)>, key: &str, value: &str) {
    env.retain(|(k, _)| k.to_string_lossy() != key);
    env.push((OsString::from(key), OsString::from(value)));
}

fn remove(env: &mut Vec<(OsString, OsString)>, key: &str) {
    env.retain(|(k, _)| k.to_string_lossy() != key);
}

/// Scans for any locally-installed `*_*.UTF-8` locale via `locale -a`,
/// best-effort: a missing or unparsable `locale` binary just means we
/// fall through to the platform default.
fn installed_utf8_locale() -> Option<String> {
    let out = std::process::Command::new("locale").arg("-a").output().ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&out.stdout);
    text.lines().map(str::trim).find(|l| is_utf8_locale(l)).map(str::to_string)
}

fn platform_fallback() -> &'static str {
    if cfg!(target_os = "macos") {
        "en_US.UTF-8"
    } else {
        "C.UTF-8"
    }
}

/// Applies the locale safeguard in-place to a prepared child environment.
///
/// `native_shell` mode sets only `LANG` (never `LC_CTYPE`) and strips
/// inherited `LC_*` vars, to avoid SSH `SendEnv LC_*` forwarding
/// surprises; `set_locale_env` additionally forces the safeguard to run
/// even when the caller's own locale already looks fine, matching the
/// session option of the same name.
pub fn apply_locale_safeguard(
    env: &mut Vec<(OsString, OsString)>,
    native_shell: bool,
    set_locale_env: bool,
) {
    if native_shell {
        let lang = find(env, "LANG");
        remove(env, "LC_ALL");
        remove(env, "LC_CTYPE");
        env.retain(|(k, _)| !k.to_string_lossy().starts_with("LC_"));
        if let Some(lang) = lang {
            set(env, "LANG", &lang);
        }
    }

    let has_utf8 = [find(env, "LC_ALL"), find(env, "LANG"), find(env, "LC_CTYPE")]
        .into_iter()
        .flatten()
        .any(|v| is_utf8_locale(&v));

    if has_utf8 && !set_locale_env {
        return;
    }

    let chosen = find(env, "LC_ALL")
        .filter(|v| is_utf8_locale(v))
        .or_else(|| find(env, "LANG").filter(|v| is_utf8_locale(v)))
        .or_else(|| find(env, "LC_CTYPE").filter(|v| is_utf8_locale(v)))
        .or_else(|| CANDIDATES.iter().map(|s| s.to_string()).next())
        .or_else(installed_utf8_locale)
        .unwrap_or_else(|| platform_fallback().to_string());

    set(env, "LANG", &chosen);
}
