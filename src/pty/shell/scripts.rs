//! Generated shell startup scripts
//!
//! Each script chains into the user's own startup file first and then
//! installs a prompt hook that emits `ESC ] 7 ; file://<host><path> BEL`.
//! None of them ever write to the user's files.

/// Passed to bash via `--rcfile`.
pub const BASH_RC: &str = r#"# Generated by cdw. Loads ~/.bashrc, then reports the working directory.
if [ -r "$HOME/.bashrc" ]; then
    . "$HOME/.bashrc"
fi

__cdw_urlencode() {
    local LC_ALL=C input="$1" out="" ch i
    for (( i = 0; i < ${#input}; i++ )); do
        ch="${input:i:1}"
        case "$ch" in
            [a-zA-Z0-9/._~-]) out+="$ch" ;;
            *) printf -v ch '%%%02X' "'$ch"; out+="$ch" ;;
        esac
    done
    printf '%s' "$out"
}

__cdw_report_cwd() {
    printf '\033]7;file://%s%s\007' "${HOSTNAME:-localhost}" "$(__cdw_urlencode "$PWD")"
}

case ";${PROMPT_COMMAND:-};" in
    *";__cdw_report_cwd;"*) ;;
    *) PROMPT_COMMAND="__cdw_report_cwd${PROMPT_COMMAND:+;$PROMPT_COMMAND}" ;;
esac
"#;

/// `$ZDOTDIR/.zshenv` while ZDOTDIR points at the integration directory.
///
/// Sources the user's real `.zshenv` with ZDOTDIR set to the user's value,
/// then points ZDOTDIR back here so zsh picks up [`ZSH_RC`] next.
pub const ZSH_ENV: &str = r#"# Generated by cdw. Loads the user's .zshenv.
__cdw_integration_dir="$ZDOTDIR"
ZDOTDIR="${CDW_USER_ZDOTDIR:-$HOME}"
if [[ -r "$ZDOTDIR/.zshenv" ]]; then
    builtin source "$ZDOTDIR/.zshenv"
fi
CDW_USER_ZDOTDIR="${ZDOTDIR:-$HOME}"
ZDOTDIR="$__cdw_integration_dir"
unset __cdw_integration_dir
"#;

/// `$ZDOTDIR/.zshrc`: restores the user's ZDOTDIR for good, loads their
/// `.zshrc` and installs the precmd hook.
pub const ZSH_RC: &str = r#"# Generated by cdw. Loads the user's .zshrc, then reports the working directory.
ZDOTDIR="${CDW_USER_ZDOTDIR:-$HOME}"
unset CDW_USER_ZDOTDIR
if [[ -r "$ZDOTDIR/.zshrc" ]]; then
    builtin source "$ZDOTDIR/.zshrc"
fi

__cdw_report_cwd() {
    emulate -L zsh
    local LC_ALL=C input="$PWD" out="" ch
    local -i i
    for (( i = 1; i <= ${#input}; i++ )); do
        ch="${input[i]}"
        if [[ "$ch" == [a-zA-Z0-9/._~-] ]]; then
            out+="$ch"
        else
            out+="$(printf '%%%02X' "'$ch")"
        fi
    done
    printf '\033]7;file://%s%s\007' "${HOST:-localhost}" "$out"
}

autoload -Uz add-zsh-hook
add-zsh-hook precmd __cdw_report_cwd
"#;

/// Sourced by fish through `--init-command`.
pub const FISH_INIT: &str = r#"# Generated by cdw. Reports the working directory on every prompt.
function __cdw_report_cwd --on-event fish_prompt
    printf '\e]7;file://%s%s\a' (hostname) (string escape --style=url -- $PWD)
end
"#;
