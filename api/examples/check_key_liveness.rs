use near_passport::{
    AccessKeyChecker, NetworkConfig, RPCEndpoint, RetryPolicy, RpcAccessKeyChecker,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let network = NetworkConfig::mainnet().with_endpoint(
        RPCEndpoint::new("https://near.lava.build:443".parse()?)
            .with_retry_policy(RetryPolicy::default().with_retries(3))
            .with_api_key("some potential api key"),
    );
    let checker = RpcAccessKeyChecker::new(network)?;

    let is_full_access = checker
        .has_full_access_key(
            &"near".parse()?,
            &"ed25519:6E8sCci9badyRkXb3JoRpBj5p8C6Tw41ELDZoiihKEtp".parse()?,
        )
        .await?;
    println!("Full access key: {is_full_access}");

    Ok(())
}
