use super::{json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use kiln_core::{AddressAllocator, BRIDGE_IP, SUBNET_MASK};

pub fn status(allocator: &AddressAllocator, json: bool) -> Result<u8, String> {
    let remaining = allocator.remaining().map_err(|e| e.to_string())?;
    let next = allocator.next_candidate().map_err(|e| e.to_string())?;

    if json {
        let out = serde_json::json!({
            "bridge": BRIDGE_IP.to_string(),
            "mask": SUBNET_MASK.to_string(),
            "remaining": remaining,
            "next": next.map(|ip| ip.to_string()),
        });
        println!("{}", json_pretty(&out)?);
    } else {
        println!("bridge:    {BRIDGE_IP}/24");
        println!("remaining: {remaining}");
        match next {
            Some(ip) => println!("next:      {ip}"),
            None => println!("next:      (pool exhausted)"),
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn reset(allocator: &AddressAllocator, json: bool) -> Result<u8, String> {
    if json {
        let seeded = allocator.reset().map_err(|e| e.to_string())?;
        println!("{}", json_pretty(&serde_json::json!({ "seeded": seeded }))?);
        return Ok(EXIT_SUCCESS);
    }

    let pb = spinner("resetting address pool...");
    match allocator.reset() {
        Ok(seeded) => {
            spin_ok(&pb, &format!("address pool reset ({seeded} addresses)"));
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            spin_fail(&pb, "address pool reset failed");
            Err(e.to_string())
        }
    }
}

pub fn take(allocator: &AddressAllocator, json: bool) -> Result<u8, String> {
    let lease = allocator.allocate().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&lease)?);
    } else {
        println!("{lease}");
    }
    Ok(EXIT_SUCCESS)
}
