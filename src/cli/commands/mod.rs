pub mod logging;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_ALLOWED_ORIGIN: &str = "allowed-origin";
pub const ARG_MASTER_KEY: &str = "master-key";
pub const ARG_RECOVERY_PEPPER: &str = "recovery-pepper";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("gardi")
        .about("Multi-tenant multi-factor authentication core")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("GARDI_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("PostgreSQL connection string")
                .long_help(
                    "PostgreSQL connection string. When omitted, the service runs on the \
                     in-memory store (development only: nothing survives a restart).",
                )
                .env("GARDI_DSN"),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer label shown in authenticator apps")
                .default_value("gardi")
                .env("GARDI_ISSUER"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ORIGIN)
                .long(ARG_ALLOWED_ORIGIN)
                .help("Origin allowed for cross-origin requests (e.g. https://app.example.com)")
                .env("GARDI_ALLOWED_ORIGIN"),
        )
        .arg(
            Arg::new(ARG_MASTER_KEY)
                .long(ARG_MASTER_KEY)
                .help("Base64 32-byte key sealing factor secrets at rest")
                .env("GARDI_MASTER_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_RECOVERY_PEPPER)
                .long(ARG_RECOVERY_PEPPER)
                .help("Base64 server-side pepper mixed into recovery code hashes")
                .env("GARDI_RECOVERY_PEPPER")
                .hide_env_values(true),
        );

    logging::with_args(command)
}
