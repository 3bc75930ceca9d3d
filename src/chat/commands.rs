//! Chat-command dispatcher: one decision per inbound line.
//!
//! Parse the leading `!token`, normalize the compact betting shorthand,
//! check the command's requirements in fixed order, then run the handler.
//! The dispatch boundary is the final catch: a handler failure becomes a
//! "command failed" chat reply and never propagates further.

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::{LiteMarket, MarketApi};
use crate::chat::{messages, ChatLine, ChatSink};
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::state::{Outcome, Side};
use crate::store::{LinkedUser, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Help,
    Signup,
    Bet { preset: Option<Side> },
    Sell,
    AllIn,
    Balance,
    Feature,
    Unfeature,
    Create,
    Resolve,
    Position,
}

/// Declarative preconditions, evaluated in this order: privilege,
/// argument count, linked account, active session. Never partially
/// applied.
struct Requirements {
    privileged: bool,
    min_args: usize,
    needs_account: bool,
    needs_session: bool,
}

impl Command {
    fn from_token(token: &str) -> Option<Command> {
        match token {
            "help" | "commands" => Some(Command::Help),
            "signup" => Some(Command::Signup),
            "bet" | "buy" => Some(Command::Bet { preset: None }),
            "y" => Some(Command::Bet {
                preset: Some(Side::Yes),
            }),
            "n" => Some(Command::Bet {
                preset: Some(Side::No),
            }),
            "sell" => Some(Command::Sell),
            "allin" => Some(Command::AllIn),
            "balance" => Some(Command::Balance),
            "select" | "feature" => Some(Command::Feature),
            "unfeature" => Some(Command::Unfeature),
            "create" => Some(Command::Create),
            "resolve" => Some(Command::Resolve),
            "position" | "pos" => Some(Command::Position),
            _ => None,
        }
    }

    fn requirements(self) -> Requirements {
        let req = |privileged, min_args, needs_account, needs_session| Requirements {
            privileged,
            min_args,
            needs_account,
            needs_session,
        };
        match self {
            Command::Help | Command::Signup => req(false, 0, false, false),
            Command::Bet { .. } => req(false, 1, true, true),
            Command::Sell => req(false, 0, true, true),
            Command::AllIn => req(false, 1, true, true),
            Command::Balance => req(false, 0, true, false),
            Command::Feature => req(true, 1, false, false),
            Command::Unfeature => req(true, 0, false, true),
            Command::Create => req(true, 1, false, false),
            Command::Resolve => req(true, 1, false, true),
            Command::Position => req(false, 0, true, true),
        }
    }
}

/// Split `!token rest of line` into a lowercased token and its arguments.
/// Lines that don't start with a command return `None`.
fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let rest = text.trim().strip_prefix('!')?;
    let mut parts = rest.split_whitespace();
    let token = parts.next()?.to_lowercase();
    if !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let args = parts.map(str::to_string).collect();
    Some((token, args))
}

/// Compact betting form: a side letter fused with an amount (`y12`, `n40`).
fn is_bet_shorthand(token: &str) -> bool {
    token.len() >= 2
        && token.starts_with(['y', 'n'])
        && token[1..].chars().all(|c| c.is_ascii_digit())
}

/// Parse a fused side+amount argument in either order: `yes50`, `y50`,
/// `50no`, `50n`. The first matching side form decides; a non-numeric
/// remainder invalidates the whole argument.
fn parse_bet_arg(arg: &str) -> Option<(Side, u64)> {
    const FORMS: [(&str, Side); 4] = [
        ("yes", Side::Yes),
        ("y", Side::Yes),
        ("no", Side::No),
        ("n", Side::No),
    ];
    for (form, side) in FORMS {
        if let Some(rest) = arg.strip_prefix(form) {
            return rest.parse().ok().map(|amount| (side, amount));
        }
        if let Some(rest) = arg.strip_suffix(form) {
            return rest.parse().ok().map(|amount| (side, amount));
        }
    }
    None
}

/// Per-line context resolved before the handler runs.
struct Ctx<'a> {
    line: &'a ChatLine,
    args: &'a [String],
    user: Option<LinkedUser>,
    market: Option<LiteMarket>,
}

impl Ctx<'_> {
    fn user(&self) -> Result<&LinkedUser> {
        self.user
            .as_ref()
            .ok_or_else(|| Error::NotFound("linked account".into()))
    }

    fn market(&self) -> Result<&LiteMarket> {
        self.market.as_ref().ok_or(Error::NoActiveMarket)
    }
}

pub struct Dispatcher {
    coordinator: Arc<Coordinator>,
    api: Arc<dyn MarketApi>,
    store: Arc<UserStore>,
    chat: Arc<dyn ChatSink>,
    signup_url: String,
}

impl Dispatcher {
    pub fn new(
        coordinator: Arc<Coordinator>,
        api: Arc<dyn MarketApi>,
        store: Arc<UserStore>,
        chat: Arc<dyn ChatSink>,
        signup_url: String,
    ) -> Self {
        Self {
            coordinator,
            api,
            store,
            chat,
            signup_url,
        }
    }

    pub async fn dispatch(&self, line: &ChatLine) {
        let Some((token, mut args)) = parse_command(&line.text) else {
            return;
        };
        let command = match Command::from_token(&token) {
            Some(command) => command,
            None if is_bet_shorthand(&token) => {
                // Rewrite `!y12` into the generic bet command with the
                // whole token as its first argument.
                args.insert(0, token);
                Command::Bet { preset: None }
            }
            None => return,
        };

        if let Err(e) = self.run(command, line, &args).await {
            warn!(
                channel = %line.channel,
                user = %line.username,
                ?command,
                error = %e,
                "command failed"
            );
            self.chat
                .say(
                    &line.channel,
                    &messages::command_failed(&line.display_name, &e.to_string()),
                )
                .await;
        }
    }

    async fn run(&self, command: Command, line: &ChatLine, args: &[String]) -> Result<()> {
        let req = command.requirements();

        if req.privileged && !line.is_privileged() {
            warn!(
                user = %line.display_name,
                ?command,
                "privileged command without permission"
            );
            // Easter egg: pretend the resolve took.
            if command == Command::Resolve && !args.is_empty() {
                self.chat
                    .say(
                        &line.channel,
                        &format!(
                            "{} resolved {} Kappa",
                            line.display_name,
                            args[0].to_uppercase()
                        ),
                    )
                    .await;
            }
            return Ok(());
        }
        if args.len() < req.min_args {
            return Ok(());
        }
        let user = self.store.user_for_twitch_login(&line.username).await;
        if req.needs_account && user.is_none() {
            self.chat
                .say(
                    &line.channel,
                    &messages::signup(&line.display_name, &self.signup_url),
                )
                .await;
            return Ok(());
        }
        let market = self.coordinator.get_market(&line.channel).await;
        if req.needs_session && market.is_none() {
            self.chat
                .say(&line.channel, &messages::no_market(&line.display_name))
                .await;
            return Ok(());
        }

        let ctx = Ctx {
            line,
            args,
            user,
            market,
        };
        match command {
            Command::Help => {
                self.chat
                    .say(&line.channel, &messages::help(&self.signup_url))
                    .await;
                Ok(())
            }
            Command::Signup => {
                self.chat
                    .say(
                        &line.channel,
                        &messages::signup(&line.display_name, &self.signup_url),
                    )
                    .await;
                Ok(())
            }
            Command::Bet { preset } => self.bet(&ctx, preset).await,
            Command::Sell => self.sell(&ctx).await,
            Command::AllIn => self.all_in(&ctx).await,
            Command::Balance => self.balance(&ctx).await,
            Command::Feature => self.feature(&ctx).await,
            Command::Unfeature => self.unfeature(&ctx).await,
            Command::Create => self.create(&ctx).await,
            Command::Resolve => self.resolve(&ctx).await,
            Command::Position => self.position(&ctx).await,
        }
    }

    async fn bet(&self, ctx: &Ctx<'_>, preset: Option<Side>) -> Result<()> {
        let user = ctx.user()?;
        let market = ctx.market()?;
        let mut arg = ctx.args[0].to_lowercase();
        match preset {
            Some(Side::Yes) => arg.push('y'),
            Some(Side::No) => arg.push('n'),
            None => {
                if let Some(second) = ctx.args.get(1) {
                    arg.push_str(&second.to_lowercase());
                }
            }
        }
        let Some((side, amount)) = parse_bet_arg(&arg) else {
            return Ok(());
        };
        match self
            .api
            .place_bet(&user.api_key, &market.id, amount, side)
            .await
        {
            Err(Error::InsufficientBalance) => {
                self.chat
                    .say(
                        &ctx.line.channel,
                        &messages::not_enough_mana_bet(&ctx.line.display_name),
                    )
                    .await;
                Ok(())
            }
            other => other,
        }
    }

    /// Liquidate the user's entire position. Positions under one share are
    /// dust and skipped.
    async fn sell(&self, ctx: &Ctx<'_>) -> Result<()> {
        let user = ctx.user()?;
        let market = ctx.market()?;
        let bets = self
            .api
            .user_bets(&market.id, &user.manifold_username)
            .await?;
        let net: f64 = bets
            .iter()
            .map(|b| match b.outcome {
                Side::Yes => b.shares,
                Side::No => -b.shares,
            })
            .sum();
        if net.abs() < 1.0 {
            return Ok(());
        }
        let side = if net > 0.0 { Side::Yes } else { Side::No };
        self.api.sell_shares(&user.api_key, &market.id, side).await
    }

    async fn all_in(&self, ctx: &Ctx<'_>) -> Result<()> {
        let user = ctx.user()?;
        let market = ctx.market()?;
        let side = match ctx.args[0].to_lowercase().as_str() {
            "yes" => Side::Yes,
            "no" => Side::No,
            _ => return Ok(()),
        };
        let balance = self
            .api
            .user_by_username(&user.manifold_username)
            .await?
            .balance;
        let amount = balance.floor() as u64;
        self.api
            .place_bet(&user.api_key, &market.id, amount, side)
            .await
    }

    async fn balance(&self, ctx: &Ctx<'_>) -> Result<()> {
        let user = ctx.user()?;
        let balance = self
            .api
            .user_by_username(&user.manifold_username)
            .await?
            .balance;
        self.chat
            .say(
                &ctx.line.channel,
                &messages::balance(&ctx.line.display_name, balance),
            )
            .await;
        Ok(())
    }

    async fn feature(&self, ctx: &Ctx<'_>) -> Result<()> {
        let market = self.api.market_by_slug(&ctx.args[0]).await?;
        self.coordinator
            .select_market(&ctx.line.channel, Some(&market.id), None)
            .await?;
        Ok(())
    }

    async fn unfeature(&self, ctx: &Ctx<'_>) -> Result<()> {
        self.coordinator
            .select_market(&ctx.line.channel, None, None)
            .await?;
        self.chat
            .say(&ctx.line.channel, &messages::market_unfeatured())
            .await;
        Ok(())
    }

    async fn create(&self, ctx: &Ctx<'_>) -> Result<()> {
        let question = ctx.args.join(" ");
        let broadcaster = self.broadcaster(&ctx.line.channel).await?;
        info!(%question, channel = %ctx.line.channel, "create command");
        match self
            .api
            .create_binary_market(&broadcaster.api_key, &question, 50.0, None)
            .await
        {
            Ok(market) => {
                info!(market = %market.id, "created market");
                self.coordinator
                    .select_market(&ctx.line.channel, Some(&market.id), None)
                    .await?;
                self.chat
                    .say(&ctx.line.channel, &messages::market_created(&question))
                    .await;
                Ok(())
            }
            Err(Error::InsufficientBalance) => {
                let balance = self
                    .api
                    .user_by_username(&broadcaster.manifold_username)
                    .await
                    .map(|u| u.balance)
                    .unwrap_or(0.0);
                self.chat
                    .say(
                        &ctx.line.channel,
                        &messages::not_enough_mana_create(&ctx.line.display_name, balance),
                    )
                    .await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve(&self, ctx: &Ctx<'_>) -> Result<()> {
        let market = ctx.market()?;
        let token = &ctx.args[0];
        let outcome =
            Outcome::from_token(token).ok_or_else(|| Error::InvalidOutcome(token.clone()))?;
        if outcome == Outcome::Prob {
            return Err(Error::InvalidOutcome(token.clone()));
        }
        let broadcaster = self.broadcaster(&ctx.line.channel).await?;
        self.api
            .resolve_binary_market(&broadcaster.api_key, &market.id, outcome)
            .await
    }

    async fn position(&self, ctx: &Ctx<'_>) -> Result<()> {
        let user = ctx.user()?;
        let shares = self
            .coordinator
            .user_position(&ctx.line.channel, &user.manifold_username)
            .await
            .ok_or(Error::NoActiveMarket)?;
        // Magnitude floored toward zero.
        self.chat
            .say(
                &ctx.line.channel,
                &messages::position(&ctx.line.display_name, shares.trunc()),
            )
            .await;
        Ok(())
    }

    /// The channel owner's linked account, whose API key backs privileged
    /// market operations.
    async fn broadcaster(&self, channel: &str) -> Result<LinkedUser> {
        self.store
            .user_for_twitch_login(channel)
            .await
            .ok_or_else(|| Error::NotFound(format!("no linked account for channel '{channel}'")))
    }
}
