use anyhow::bail;
use clap::Args;
use provdir_locations::{
    FieldUpdate, LocationDraft, LocationPatch, ServiceNormalizer, ServiceRef, WaitlistStatus,
};

/// Optional fields accepted when adding a location.
#[derive(Debug, Default, Args)]
pub struct LocationFields {
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub address1: Option<String>,
    #[arg(long)]
    pub address2: Option<String>,
    #[arg(long)]
    pub city: Option<String>,
    /// Two-letter state code (e.g., SC)
    #[arg(long)]
    pub state: Option<String>,
    #[arg(long)]
    pub zip: Option<String>,
    /// Offered service, by catalog name; repeatable
    #[arg(long = "service")]
    pub services: Vec<String>,
    /// In-home waitlist status (e.g., "1-2 weeks")
    #[arg(long)]
    pub in_home_waitlist: Option<String>,
    /// In-clinic waitlist status (e.g., "No waitlist")
    #[arg(long)]
    pub in_clinic_waitlist: Option<String>,
}

impl LocationFields {
    pub(crate) fn into_draft(
        self,
        name: String,
        normalizer: &ServiceNormalizer,
    ) -> anyhow::Result<LocationDraft> {
        Ok(LocationDraft {
            name: Some(name),
            phone: self.phone,
            address1: self.address1,
            address2: self.address2,
            city: self.city,
            state: self.state,
            zip: self.zip,
            services: resolve_services(&self.services, normalizer),
            in_home_waitlist: parse_waitlist(self.in_home_waitlist.as_deref())?,
            in_clinic_waitlist: parse_waitlist(self.in_clinic_waitlist.as_deref())?,
        })
    }
}

/// Fields accepted when editing a location. Omitted flags keep the current
/// value; `--clear` nulls a field.
#[derive(Debug, Default, Args)]
pub struct UpdateFields {
    #[arg(long)]
    pub name: Option<String>,
    #[command(flatten)]
    pub fields: LocationFields,
    /// Replace the service list even when no --service is given
    #[arg(long)]
    pub replace_services: bool,
    /// Field to null (phone, address1, address2, city, state, zip,
    /// in-home-waitlist, in-clinic-waitlist); repeatable
    #[arg(long = "clear")]
    pub clear: Vec<String>,
}

impl UpdateFields {
    pub(crate) fn into_patch(self, normalizer: &ServiceNormalizer) -> anyhow::Result<LocationPatch> {
        let fields = self.fields;
        let mut patch = LocationPatch {
            name: set_or_keep(self.name),
            phone: set_or_keep(fields.phone),
            address1: set_or_keep(fields.address1),
            address2: set_or_keep(fields.address2),
            city: set_or_keep(fields.city),
            state: set_or_keep(fields.state),
            zip: set_or_keep(fields.zip),
            services: (self.replace_services || !fields.services.is_empty())
                .then(|| resolve_services(&fields.services, normalizer)),
            in_home_waitlist: set_or_keep(parse_waitlist(fields.in_home_waitlist.as_deref())?),
            in_clinic_waitlist: set_or_keep(parse_waitlist(
                fields.in_clinic_waitlist.as_deref(),
            )?),
        };

        for field in &self.clear {
            match field.as_str() {
                "phone" => patch.phone = FieldUpdate::Clear,
                "address1" => patch.address1 = FieldUpdate::Clear,
                "address2" => patch.address2 = FieldUpdate::Clear,
                "city" => patch.city = FieldUpdate::Clear,
                "state" => patch.state = FieldUpdate::Clear,
                "zip" => patch.zip = FieldUpdate::Clear,
                "in-home-waitlist" => patch.in_home_waitlist = FieldUpdate::Clear,
                "in-clinic-waitlist" => patch.in_clinic_waitlist = FieldUpdate::Clear,
                other => bail!("cannot clear unknown field '{other}'"),
            }
        }
        Ok(patch)
    }
}

fn set_or_keep<T>(value: Option<T>) -> FieldUpdate<T> {
    value.map_or(FieldUpdate::Keep, FieldUpdate::Set)
}

fn resolve_services(names: &[String], normalizer: &ServiceNormalizer) -> Vec<ServiceRef> {
    names
        .iter()
        .map(|name| {
            let service = normalizer.resolve_name(name);
            if !service.is_resolved() {
                tracing::warn!(service = %name, "service not in catalog; sending id 0");
            }
            service
        })
        .collect()
}

fn parse_waitlist(raw: Option<&str>) -> anyhow::Result<Option<WaitlistStatus>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match WaitlistStatus::parse(raw) {
        Some(status) if status.is_recognized() => Ok(Some(status)),
        Some(_) => {
            let known: Vec<String> = WaitlistStatus::KNOWN
                .iter()
                .map(ToString::to_string)
                .collect();
            bail!("unknown waitlist status '{raw}'; expected one of: {}", known.join(", "))
        }
        None => Ok(None),
    }
}
