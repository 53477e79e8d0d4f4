//! itemgate-token - print a bearer token for local testing

use clap::Parser;

use itemgate::auth::JwtValidator;

#[derive(Parser, Debug)]
#[command(name = "itemgate-token")]
#[command(about = "Print an HS256 bearer token whose subject is the item owner")]
struct Args {
    /// Owner id placed in the `sub` claim
    #[arg(long, default_value = "test-user")]
    subject: String,

    /// Signing secret
    #[arg(long, env = "JWT_SECRET", default_value = "change-me")]
    jwt_secret: String,

    /// Token lifetime in seconds
    #[arg(long, default_value = "86400")]
    ttl_secs: u64,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let validator = JwtValidator::new(args.jwt_secret)?;
    println!("{}", validator.generate_token(&args.subject, args.ttl_secs)?);
    Ok(())
}
