use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{
        application::{Command, CommandOptionType},
        id::GuildId,
    },
    prelude::Context,
};

use crate::i18n::{Catalog, DEFAULT_LOCALE};

/// Catalog locale codes and the Discord locales they translate.
const DISCORD_LOCALES: &[(&str, &str)] = &[("de", "de"), ("es", "es-ES")];

/// Registers global commands, replacing whatever was registered before
pub async fn register_global_commands(ctx: &Context, catalog: &Catalog) -> Result<()> {
    Command::set_global_commands(&ctx.http, all_commands(catalog)).await?;
    Ok(())
}

/// Registers commands for one guild (development)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId, catalog: &Catalog) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands(catalog)).await?;
    Ok(())
}

pub fn all_commands(catalog: &Catalog) -> Vec<CreateCommand> {
    vec![
        command(catalog, "play").add_option(option(catalog, "play", CommandOptionType::String, "url").required(true)),
        command(catalog, "playnext")
            .add_option(option(catalog, "playnext", CommandOptionType::String, "url").required(true)),
        command(catalog, "skip"),
        command(catalog, "queue").add_option(
            option(catalog, "queue", CommandOptionType::Integer, "page").min_int_value(1),
        ),
        command(catalog, "clear"),
        command(catalog, "stop"),
        command(catalog, "pause"),
        command(catalog, "resume"),
        command(catalog, "nowplaying"),
        command(catalog, "shuffle"),
        command(catalog, "remove").add_option(
            option(catalog, "remove", CommandOptionType::Integer, "position")
                .required(true)
                .min_int_value(1),
        ),
        command(catalog, "move")
            .add_option(
                option(catalog, "move", CommandOptionType::Integer, "from")
                    .required(true)
                    .min_int_value(1),
            )
            .add_option(
                option(catalog, "move", CommandOptionType::Integer, "to")
                    .required(true)
                    .min_int_value(1),
            ),
        command(catalog, "history")
            .add_option(option(catalog, "history", CommandOptionType::Boolean, "clear")),
        language_command(catalog),
    ]
}

fn language_command(catalog: &Catalog) -> CreateCommand {
    let language = catalog.available_locales().into_iter().fold(
        option(catalog, "language", CommandOptionType::String, "language").required(true),
        |option, locale| option.add_string_choice(locale, locale),
    );

    command(catalog, "language")
        .add_option(language)
        .add_option(option(catalog, "language", CommandOptionType::Boolean, "personal").required(true))
}

fn command(catalog: &Catalog, name: &str) -> CreateCommand {
    let key = format!("command.{}.description", name);
    DISCORD_LOCALES.iter().fold(
        CreateCommand::new(name).description(catalog.get(DEFAULT_LOCALE, &key)),
        |command, (locale, discord)| command.description_localized(*discord, catalog.get(locale, &key)),
    )
}

fn option(catalog: &Catalog, command: &str, kind: CommandOptionType, name: &str) -> CreateCommandOption {
    let key = format!("command.{}.{}_description", command, name);
    DISCORD_LOCALES.iter().fold(
        CreateCommandOption::new(kind, name, catalog.get(DEFAULT_LOCALE, &key)),
        |option, (locale, discord)| option.description_localized(*discord, catalog.get(locale, &key)),
    )
}
