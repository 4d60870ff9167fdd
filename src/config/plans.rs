use crate::modules::users::model::PlanTier;

/// Static limits and generation parameters for a subscription tier.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub name: &'static str,
    pub monthly_quota: i32,
    pub whisper_quota: i32,
    /// Longest accepted video, in whole minutes.
    pub max_duration: u32,
    pub features: PlanFeatures,
    pub export_formats: &'static [&'static str],
}

/// The subset of a plan the content generator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanFeatures {
    pub model: &'static str,
    pub blog_length: &'static str,
    pub seo_optimization: bool,
}

const FREE: Plan = Plan {
    name: "Free",
    monthly_quota: 3,
    whisper_quota: 1,
    max_duration: 15,
    features: PlanFeatures {
        model: "gemini-1.5-flash",
        blog_length: "short (~600 words)",
        seo_optimization: false,
    },
    export_formats: &["markdown"],
};

const STARTER: Plan = Plan {
    name: "Starter",
    monthly_quota: 30,
    whisper_quota: 5,
    max_duration: 30,
    features: PlanFeatures {
        model: "gemini-1.5-flash",
        blog_length: "medium (~1000 words)",
        seo_optimization: true,
    },
    export_formats: &["markdown", "html"],
};

const PRO: Plan = Plan {
    name: "Pro",
    monthly_quota: 100,
    whisper_quota: 20,
    max_duration: 60,
    features: PlanFeatures {
        model: "gemini-1.5-pro",
        blog_length: "long (~1500 words)",
        seo_optimization: true,
    },
    export_formats: &["markdown", "html", "docx"],
};

const AGENCY: Plan = Plan {
    name: "Agency",
    monthly_quota: 300,
    whisper_quota: 60,
    max_duration: 120,
    features: PlanFeatures {
        model: "gemini-1.5-pro",
        blog_length: "long (~1500 words)",
        seo_optimization: true,
    },
    export_formats: &["markdown", "html", "docx", "pdf"],
};

pub fn for_tier(tier: PlanTier) -> &'static Plan {
    match tier {
        PlanTier::Free => &FREE,
        PlanTier::Starter => &STARTER,
        PlanTier::Pro => &PRO,
        PlanTier::Agency => &AGENCY,
    }
}
