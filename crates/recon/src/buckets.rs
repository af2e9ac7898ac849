use std::collections::HashMap;

/// Bucket used for resource names the table does not know.
pub const FALLBACK_BUCKET: &str = "Other";

const SEED: &[(&str, &str)] = &[
    ("Block Storage for VPC", "Storage"),
    ("Cloud Object Storage", "Storage"),
    ("Cloud Activity Tracker", "Notifications"),
    ("Cloud Monitoring", "Notifications"),
    ("Continuous Delivery", "Other"),
    ("Log Analysis", "Other"),
    ("Floating IP for VPC", "IP Address"),
    ("Kubernetes Service", "Instance Usage"),
    ("Load Balancer for VPC", "Load Balancer"),
    ("Virtual Private Cloud", "VPN"),
    ("Virtual Private Endpoint for VPC", "VPC Endpoint"),
    ("Virtual Server for VPC", "VPC Endpoint"),
];

/// Maps resource names reported by a resource-level source to the cost
/// categories used by the aggregated source.
#[derive(Debug, Clone)]
pub struct BucketTable {
    buckets: HashMap<String, String>,
}

impl Default for BucketTable {
    fn default() -> Self {
        Self::seeded()
    }
}

impl BucketTable {
    /// The stock IBM Cloud resource mapping.
    pub fn seeded() -> Self {
        let buckets = SEED
            .iter()
            .map(|(name, bucket)| (name.to_string(), bucket.to_string()))
            .collect();
        Self { buckets }
    }

    pub fn empty() -> Self {
        Self { buckets: HashMap::new() }
    }

    /// Add or replace one mapping.
    pub fn with(mut self, resource: &str, bucket: &str) -> Self {
        self.insert(resource, bucket);
        self
    }

    pub fn insert(&mut self, resource: &str, bucket: &str) {
        self.buckets.insert(resource.to_string(), bucket.to_string());
    }

    /// The mapped bucket, without fallback.
    pub fn get(&self, resource: &str) -> Option<&str> {
        self.buckets.get(resource).map(String::as_str)
    }

    /// The bucket for `resource`, falling back to [`FALLBACK_BUCKET`] with a
    /// warning for names the table does not know.
    pub fn bucket_for(&self, resource: &str) -> &str {
        match self.get(resource) {
            Some(bucket) => bucket,
            None => {
                tracing::warn!(resource, "unknown resource name; assigning to {FALLBACK_BUCKET}");
                FALLBACK_BUCKET
            }
        }
    }
}
