//! simple_bank - double-entry transfer engine
//!
//! Command line front end over the PostgreSQL ledger.
//!
//! ```text
//! simple_bank [--env dev] open <owner> <currency> <balance>
//! simple_bank [--env dev] account <id>
//! simple_bank [--env dev] entries <account_id>
//! simple_bank [--env dev] transfer <from_account_id> <to_account_id> <amount> <currency>
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr and the log file.
//! A transfer is refused unless both accounts hold `<currency>`.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use simple_bank::config::AppConfig;
use simple_bank::db::Database;
use simple_bank::db::schema::init_schema;
use simple_bank::ledger::{
    Account, CreateAccountParams, LedgerBackend, LedgerError, PgBackend, Store, TransferTxParams,
    TransferTxResult,
};
use simple_bank::AccountId;

/// Base delay between retries; grows linearly with the attempt number
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Open(CreateAccountParams),
    Account(AccountId),
    Entries(AccountId),
    Transfer {
        arg: TransferTxParams,
        currency: String,
    },
}

fn get_env(args: &[String]) -> String {
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Positional arguments with `--env <name>` removed
fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--env" || args[i] == "-e" {
            i += 2;
            continue;
        }
        out.push(args[i].as_str());
        i += 1;
    }
    out
}

fn parse_command(args: &[String]) -> Result<Command> {
    let args = positional(args);
    let num = |s: &str, what: &str| -> Result<i64> {
        s.parse::<i64>()
            .with_context(|| format!("invalid {}: {}", what, s))
    };

    match args.as_slice() {
        ["open", owner, currency, balance] => Ok(Command::Open(CreateAccountParams {
            owner: owner.to_string(),
            currency: currency.to_string(),
            balance: num(*balance, "balance")?,
        })),
        ["account", id] => Ok(Command::Account(num(*id, "account id")?)),
        ["entries", id] => Ok(Command::Entries(num(*id, "account id")?)),
        ["transfer", from, to, amount, currency] => Ok(Command::Transfer {
            arg: TransferTxParams {
                from_account_id: num(*from, "from account id")?,
                to_account_id: num(*to, "to account id")?,
                amount: num(*amount, "amount")?,
            },
            currency: currency.to_string(),
        }),
        _ => bail!(
            "usage: simple_bank [--env <env>] open <owner> <currency> <balance> | account <id> | entries <account_id> | transfer <from> <to> <amount> <currency>"
        ),
    }
}

/// Load an account and check it is denominated in `currency`.
///
/// A missing account surfaces as the underlying [`LedgerError`].
async fn valid_account<B: LedgerBackend>(
    store: &Store<B>,
    account_id: AccountId,
    currency: &str,
) -> Result<Account> {
    let account = store.get_account(account_id).await?;
    if account.currency != currency {
        bail!(
            "account [{}] currency mismatch: {} vs {}",
            account_id,
            account.currency,
            currency
        );
    }
    Ok(account)
}

/// Validate both sides, then transfer with retry
async fn transfer<B: LedgerBackend>(
    store: &Store<B>,
    arg: TransferTxParams,
    currency: &str,
    max_retries: u32,
) -> Result<TransferTxResult> {
    valid_account(store, arg.from_account_id, currency).await?;
    valid_account(store, arg.to_account_id, currency).await?;
    Ok(transfer_with_retry(store, arg, max_retries).await?)
}

/// Run a transfer, re-running it on lock-conflict errors up to `max_retries`
/// extra times. Any other error is returned immediately.
async fn transfer_with_retry<B: LedgerBackend>(
    store: &Store<B>,
    arg: TransferTxParams,
    max_retries: u32,
) -> Result<TransferTxResult, LedgerError> {
    let mut attempt = 0;
    loop {
        match store.transfer_tx(arg).await {
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                warn!(attempt, error = %e, "Transfer conflicted, retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            result => return result,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let env = get_env(&args);
    let command = parse_command(&args)?;

    let app_config = AppConfig::load(&env)?;
    let _log_guard = simple_bank::logging::init_logging(&app_config);

    info!(
        version = env!("BUILD_VERSION"),
        "Starting simple_bank in {} mode", env
    );

    let database_url = app_config
        .postgres_url
        .as_deref()
        .context("postgres_url is not configured (set it in the config file or DATABASE_URL)")?;
    let db = Database::connect(database_url, &app_config.database).await?;
    init_schema(db.pool()).await?;

    let backend =
        PgBackend::new(db.pool().clone()).with_lock_timeout(app_config.ledger.lock_timeout());
    let store = Store::new(backend, app_config.ledger.store_config());

    match command {
        Command::Open(arg) => print_json(&store.create_account(arg).await?)?,
        Command::Account(id) => print_json(&store.get_account(id).await?)?,
        Command::Entries(id) => print_json(&store.list_entries(id).await?)?,
        Command::Transfer { arg, currency } => {
            let result =
                transfer(&store, arg, &currency, app_config.ledger.max_retries).await?;
            info!(transfer_id = result.transfer.id, "Transfer committed");
            print_json(&result)?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_bank::ledger::{
        AddAccountBalanceParams, LedgerPrimitives, MemoryBackend, StoreConfig, TransactionScope,
    };

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_transfer_with_env() {
        let argv = args("--env prod transfer 1 2 500 USD");
        assert_eq!(get_env(&argv), "prod");
        assert_eq!(
            parse_command(&argv).unwrap(),
            Command::Transfer {
                arg: TransferTxParams {
                    from_account_id: 1,
                    to_account_id: 2,
                    amount: 500,
                },
                currency: "USD".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_open_and_account() {
        assert_eq!(
            parse_command(&args("open alice USD 100")).unwrap(),
            Command::Open(CreateAccountParams {
                owner: "alice".to_string(),
                balance: 100,
                currency: "USD".to_string(),
            })
        );
        assert_eq!(
            parse_command(&args("account 7")).unwrap(),
            Command::Account(7)
        );
        assert_eq!(get_env(&args("account 7")), "dev");
    }

    #[test]
    fn test_build_version_starts_with_crate_version() {
        let version = env!("BUILD_VERSION");
        assert!(version.starts_with(env!("CARGO_PKG_VERSION")), "{}", version);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_command(&args("transfer 1 2")).is_err());
        assert!(parse_command(&args("transfer 1 2 10")).is_err());
        assert!(parse_command(&args("transfer 1 x 10 USD")).is_err());
        assert!(parse_command(&args("withdraw 1 10")).is_err());
    }

    #[tokio::test]
    async fn test_transfer_with_retry_gives_up_on_non_retryable() {
        let store = Store::new(MemoryBackend::new(), StoreConfig::default());
        let err = transfer_with_retry(
            &store,
            TransferTxParams {
                from_account_id: 1,
                to_account_id: 2,
                amount: 10,
            },
            3,
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_transfer_with_retry_recovers_from_lock_conflict() {
        let store = Store::new(
            MemoryBackend::with_lock_timeout(Duration::from_millis(20)),
            StoreConfig::default(),
        );
        let a = store
            .create_account(CreateAccountParams {
                owner: "a".to_string(),
                balance: 100,
                currency: "USD".to_string(),
            })
            .await
            .unwrap();
        let b = store
            .create_account(CreateAccountParams {
                owner: "b".to_string(),
                balance: 0,
                currency: "USD".to_string(),
            })
            .await
            .unwrap();

        // Hold a's row lock briefly so the first attempt times out
        let mut blocker = store.backend().begin().await.unwrap();
        blocker
            .add_account_balance(AddAccountBalanceParams { id: a.id, amount: 0 })
            .await
            .unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            blocker.rollback().await.unwrap();
        });

        let result = transfer_with_retry(
            &store,
            TransferTxParams {
                from_account_id: a.id,
                to_account_id: b.id,
                amount: 10,
            },
            5,
        )
        .await
        .unwrap();
        release.await.unwrap();

        assert_eq!(result.from_account.balance, 90);
        assert_eq!(result.to_account.balance, 10);
    }

    async fn open(store: &Store<MemoryBackend>, owner: &str, currency: &str) -> Account {
        store
            .create_account(CreateAccountParams {
                owner: owner.to_string(),
                balance: 100,
                currency: currency.to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_transfer_rejects_currency_mismatch() {
        let store = Store::new(MemoryBackend::new(), StoreConfig::default());
        let usd = open(&store, "usd", "USD").await;
        let eur = open(&store, "eur", "EUR").await;
        let arg = TransferTxParams {
            from_account_id: usd.id,
            to_account_id: eur.id,
            amount: 10,
        };

        // Destination does not hold USD
        let err = transfer(&store, arg, "USD", 0).await.unwrap_err();
        assert!(err.to_string().contains("currency mismatch"), "{}", err);

        // Source does not hold EUR
        let err = transfer(&store, arg, "EUR", 0).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("account [{}] currency mismatch: USD vs EUR", usd.id)
        );

        // Nothing moved
        assert_eq!(store.get_account(usd.id).await.unwrap().balance, 100);
        assert_eq!(store.get_account(eur.id).await.unwrap().balance, 100);
        assert_eq!(store.backend().counts().transfers, 0);
    }

    #[tokio::test]
    async fn test_transfer_validates_accounts_exist() {
        let store = Store::new(MemoryBackend::new(), StoreConfig::default());
        let usd = open(&store, "usd", "USD").await;
        let arg = TransferTxParams {
            from_account_id: usd.id,
            to_account_id: usd.id + 100,
            amount: 10,
        };

        let err = transfer(&store, arg, "USD", 0).await.unwrap_err();
        let ledger_err = err.downcast_ref::<LedgerError>().unwrap();
        assert!(matches!(ledger_err, LedgerError::AccountNotFound(id) if *id == usd.id + 100));
    }

    #[tokio::test]
    async fn test_transfer_same_currency_succeeds() {
        let store = Store::new(MemoryBackend::new(), StoreConfig::default());
        let a = open(&store, "a", "CAD").await;
        let b = open(&store, "b", "CAD").await;

        let result = transfer(
            &store,
            TransferTxParams {
                from_account_id: a.id,
                to_account_id: b.id,
                amount: 30,
            },
            "CAD",
            0,
        )
        .await
        .unwrap();
        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 130);
    }
}
