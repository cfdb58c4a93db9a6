const USAGE: &str = "
Usage: nats_test_server [--host=<s>] [--port=<#>] [--bugginess=<s>] [--token=<s>]

Options:
    --host=<s>      Host to listen on [default: 0.0.0.0].
    --port=<n>      Port to listen on [default: 4222].
    --bugginess=<#> 1 in <bugginess> operations will fail [default: 200].
    --token=<s>     Require clients to present this token.
";

#[derive(Clone, Debug)]
struct Args {
    port: u16,
    host: String,
    bugginess: u32,
    token: Option<String>,
}

impl Default for Args {
    fn default() -> Args {
        Args {
            port: 4222,
            host: "0.0.0.0".into(),
            bugginess: 200,
            token: None,
        }
    }
}

fn parse<'a, I, T>(mut iter: I) -> T
where
    I: Iterator<Item = &'a str>,
    T: std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    iter.next().expect(USAGE).parse().expect(USAGE)
}

impl Args {
    fn parse() -> Args {
        let mut args = Args::default();
        for raw_arg in std::env::args().skip(1) {
            let mut splits = raw_arg.get(2..).expect(USAGE).split('=');
            match splits.next().expect(USAGE) {
                "host" => args.host = parse(&mut splits),
                "port" => args.port = parse(&mut splits),
                "bugginess" => args.bugginess = parse(&mut splits),
                "token" => args.token = Some(parse(&mut splits)),
                other => panic!("unknown option: {}, {}", other, USAGE),
            }
        }
        args
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let args = Args::parse();
    log::info!("starting test server with args {:?}", &args);

    let mut builder = nats_test_server::NatsTestServer::build()
        .address(format!("{}:{}", args.host, args.port))
        .bugginess(args.bugginess);
    if let Some(token) = &args.token {
        builder = builder.token(token);
    }

    if builder.spawn().join().is_err() {
        log::error!("test server thread panicked");
    }
}
